//! Variable substitution using minijinja templates.
//!
//! Outbound text is rendered against the execution's variables. The contact's
//! `name` and `phone` are available too, unless a flow variable of the same
//! name overrides them:
//! ```text
//! Hi {{ name }}, your task "{{ task_title }}" is due.
//! ```
//! Undefined variables render as empty strings. A template that fails to
//! render is sent as written.

use flowline_store::Variables;
use minijinja::{Environment, Value};
use serde_json::Map;
use tracing::warn;

use crate::ports::Contact;

/// Build the rendering context: contact fields first, flow variables on top.
pub fn template_context(variables: &Variables, contact: Option<&Contact>) -> Map<String, serde_json::Value> {
  let mut context = Map::new();
  if let Some(contact) = contact {
    if let Some(name) = &contact.name {
      context.insert("name".to_string(), name.clone().into());
    }
    if let Some(phone) = &contact.phone {
      context.insert("phone".to_string(), phone.clone().into());
    }
  }
  for (key, value) in variables.as_map() {
    context.insert(key.clone(), value.clone());
  }
  context
}

/// Render `template` against the variables and contact.
pub fn render(template: &str, variables: &Variables, contact: Option<&Contact>) -> String {
  if !template.contains("{{") && !template.contains("{%") {
    return template.to_string();
  }

  let env = Environment::new();
  let context = Value::from_serialize(template_context(variables, contact));
  match env.render_str(template, context) {
    Ok(rendered) => rendered,
    Err(e) => {
      warn!(error = %e, "failed to render template, sending raw text");
      template.to_string()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn vars(value: serde_json::Value) -> Variables {
    Variables::from(value.as_object().cloned().unwrap())
  }

  #[test]
  fn test_render_variables() {
    let rendered = render("Hi {{name}}!", &vars(json!({ "name": "Ana" })), None);
    assert_eq!(rendered, "Hi Ana!");
  }

  #[test]
  fn test_contact_fields_are_overridden_by_variables() {
    let contact = Contact {
      id: "c1".to_string(),
      name: Some("Ana Souza".to_string()),
      phone: Some("5511999990000".to_string()),
      ..Default::default()
    };

    assert_eq!(
      render("{{ name }} / {{ phone }}", &Variables::new(), Some(&contact)),
      "Ana Souza / 5511999990000"
    );
    assert_eq!(
      render("{{ name }}", &vars(json!({ "name": "Ana" })), Some(&contact)),
      "Ana"
    );
  }

  #[test]
  fn test_undefined_renders_empty() {
    assert_eq!(render("[{{ missing }}]", &Variables::new(), None), "[]");
  }

  #[test]
  fn test_broken_template_falls_back_to_raw() {
    let raw = "Hi {{ name ";
    assert_eq!(render(raw, &vars(json!({ "name": "Ana" })), None), raw);
  }

  #[test]
  fn test_plain_text_untouched() {
    assert_eq!(render("no placeholders", &Variables::new(), None), "no placeholders");
  }
}
