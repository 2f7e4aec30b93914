use serde_json::{Map, Value};

/// Keys that address the quote this session belongs to.
pub const SESSION_KEY_FIELDS: [&str; 2] = ["key", "mainkey"];

/// Keys that would move the session past the approval gate.
pub const GATE_FLAG_FIELDS: [&str; 2] = ["is_approved", "approved"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Strip { reason_code: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrippedKey {
    pub key: String,
    pub reason_code: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    /// Keep a caller-seeded quote key from being replaced by extraction output.
    pub protect_seeded_key: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { protect_seeded_key: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, key: &str, prior: &Map<String, Value>) -> GuardrailDecision {
        if GATE_FLAG_FIELDS.contains(&key) {
            return GuardrailDecision::Strip { reason_code: "gate_flag_from_extraction" };
        }
        if self.protect_seeded_key && SESSION_KEY_FIELDS.contains(&key) && has_seeded_key(prior) {
            return GuardrailDecision::Strip { reason_code: "seeded_key_protected" };
        }
        GuardrailDecision::Allow
    }

    /// Removes every key the policy rejects from `extracted`.
    pub fn sanitize(
        &self,
        extracted: &mut Map<String, Value>,
        prior: &Map<String, Value>,
    ) -> Vec<StrippedKey> {
        let rejected: Vec<StrippedKey> = extracted
            .keys()
            .filter_map(|key| match self.evaluate(key, prior) {
                GuardrailDecision::Allow => None,
                GuardrailDecision::Strip { reason_code } => {
                    Some(StrippedKey { key: key.clone(), reason_code })
                }
            })
            .collect();
        for stripped in &rejected {
            extracted.remove(&stripped.key);
        }
        rejected
    }
}

fn has_seeded_key(prior: &Map<String, Value>) -> bool {
    match prior.get("key") {
        Some(Value::String(key)) => !key.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}
