//! Variable substitution
//!
//! Replaces `${metadata.name}` / `${environment.type}` style placeholders
//! across the fixed string fields of a step and the string-valued entries
//! of its variables map. Substitution happens on a step-local copy before
//! type dispatch; unknown placeholders are left untouched.

use std::collections::BTreeMap;

use groundwork_core::StepSpec;

/// A set of named values available for placeholder substitution.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    vars: BTreeMap<String, String>,
}

impl SubstitutionContext {
    /// Context carrying the two placeholders every workflow sees.
    pub fn new(app_name: &str, env_type: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("metadata.name".to_string(), app_name.to_string());
        vars.insert("environment.type".to_string(), env_type.to_string());
        Self { vars }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Replace every known `${key}` occurrence in `input`.
    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.vars.get(key) {
                        Some(value) => out.push_str(value),
                        // unknown placeholder stays verbatim
                        None => {
                            out.push_str("${");
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Substitute in place across a step's string fields and the
    /// string-valued entries of its variables map.
    pub fn apply_step(&self, step: &mut StepSpec) {
        for field in step.string_fields_mut() {
            if let Some(value) = field.as_mut() {
                *value = self.apply(value);
            }
        }
        for value in step.variables.values_mut() {
            if let serde_json::Value::String(s) = value {
                *s = self.apply(s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_placeholders() {
        let ctx = SubstitutionContext::new("shop", "kubernetes");
        assert_eq!(
            ctx.apply("${metadata.name}-${environment.type}"),
            "shop-kubernetes"
        );
    }

    #[test]
    fn leaves_unknown_placeholders_verbatim() {
        let ctx = SubstitutionContext::new("shop", "kubernetes");
        assert_eq!(ctx.apply("${mystery} and ${metadata.name}"), "${mystery} and shop");
    }

    #[test]
    fn handles_unterminated_placeholder() {
        let ctx = SubstitutionContext::new("shop", "kubernetes");
        assert_eq!(ctx.apply("prefix ${metadata.name"), "prefix ${metadata.name");
    }

    #[test]
    fn substitutes_step_fields_and_variables() {
        let ctx = SubstitutionContext::new("shop", "ephemeral")
            .with_var("resource.name", "db");

        let mut step = StepSpec {
            name: "deploy".into(),
            step_type: "container-apply".into(),
            namespace: Some("${metadata.name}-${environment.type}".into()),
            commit_message: Some("provision ${resource.name}".into()),
            ..Default::default()
        };
        step.variables
            .insert("target".into(), serde_json::json!("${metadata.name}"));
        step.variables.insert("replicas".into(), serde_json::json!(3));

        ctx.apply_step(&mut step);

        assert_eq!(step.namespace.as_deref(), Some("shop-ephemeral"));
        assert_eq!(step.commit_message.as_deref(), Some("provision db"));
        assert_eq!(step.variables["target"], serde_json::json!("shop"));
        assert_eq!(step.variables["replicas"], serde_json::json!(3));
    }
}
