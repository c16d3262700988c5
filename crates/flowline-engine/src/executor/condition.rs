use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};
use flowline_flow::{ConditionData, ConditionType};
use serde_json::Value;

use super::{StepContext, non_empty};
use crate::error::EngineError;
use crate::ports::{Contact, Services};

/// Evaluate a condition node. Lookup errors propagate.
pub(crate) async fn evaluate(
  services: &Services,
  ctx: &StepContext<'_>,
  data: &ConditionData,
) -> Result<bool, EngineError> {
  let contact_id = &ctx.execution.contact_id;
  let expected = data.value.as_deref().unwrap_or_default().to_lowercase();

  let met = match data.condition_type {
    ConditionType::HasTag => match non_empty(data.tag_id.as_deref()) {
      Some(tag_id) => services
        .contacts
        .context(contact_id)
        .await?
        .tag_ids
        .iter()
        .any(|t| t == tag_id),
      None => false,
    },
    ConditionType::InStage => {
      let stage = services.contacts.context(contact_id).await?.stage_id;
      stage.is_some() && stage.as_deref() == non_empty(data.column_id.as_deref())
    }
    ConditionType::BusinessHours => is_business_hours(Local::now().naive_local()),
    ConditionType::HasValue => match (ctx.contact, non_empty(data.field.as_deref())) {
      (Some(contact), Some(field)) => has_value(contact, field),
      _ => false,
    },
    ConditionType::MsgContains => message_text(ctx).contains(&expected),
    ConditionType::MsgEquals => message_text(ctx).trim() == expected.trim(),
  };

  Ok(met)
}

/// Monday to Friday, 08:00 to 17:59.
pub fn is_business_hours(at: NaiveDateTime) -> bool {
  let weekday = !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
  weekday && (8..18).contains(&at.hour())
}

/// Whether the contact record carries a non-empty value for `field`. The
/// typed columns shadow custom fields of the same name.
fn has_value(contact: &Contact, field: &str) -> bool {
  let column = match field {
    "id" => Some(contact.id.as_str()),
    "name" => contact.name.as_deref(),
    "phone" => contact.phone.as_deref(),
    _ => return contact.fields.get(field).is_some_and(truthy),
  };
  column.is_some_and(|v| !v.is_empty())
}

fn message_text(ctx: &StepContext<'_>) -> String {
  ctx
    .variables()
    .get_str("text")
    .unwrap_or_default()
    .to_lowercase()
}

fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDate;
  use serde_json::json;

  fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
      .unwrap()
      .and_hms_opt(hour, minute, 0)
      .unwrap()
  }

  #[test]
  fn test_business_hours() {
    // 2024-06-03 is a Monday.
    assert!(is_business_hours(at(2024, 6, 3, 8, 0)));
    assert!(is_business_hours(at(2024, 6, 7, 17, 59)));
    assert!(!is_business_hours(at(2024, 6, 3, 7, 59)));
    assert!(!is_business_hours(at(2024, 6, 3, 18, 0)));
    assert!(!is_business_hours(at(2024, 6, 8, 10, 0)));
    assert!(!is_business_hours(at(2024, 6, 9, 10, 0)));
  }

  #[test]
  fn test_has_value_reads_typed_columns() {
    let mut contact = Contact {
      id: "c1".to_string(),
      name: Some(String::new()),
      phone: Some("5511999990000".to_string()),
      fields: serde_json::Map::new(),
    };
    contact.fields.insert("company".to_string(), json!("Acme"));
    contact.fields.insert("score".to_string(), json!(0));
    contact.fields.insert("name".to_string(), json!("shadowed"));

    assert!(has_value(&contact, "phone"));
    assert!(has_value(&contact, "company"));
    assert!(!has_value(&contact, "name"));
    assert!(!has_value(&contact, "score"));
    assert!(!has_value(&contact, "email"));

    contact.phone = None;
    assert!(!has_value(&contact, "phone"));
  }

  #[test]
  fn test_truthy() {
    assert!(truthy(&json!("x")));
    assert!(truthy(&json!(1)));
    assert!(!truthy(&json!("")));
    assert!(!truthy(&json!(0)));
    assert!(!truthy(&json!(false)));
    assert!(!truthy(&Value::Null));
  }
}
