pub mod pii;
pub mod metrics;

use chrono::Utc;
use serde_json::{json, Map, Value};
use self::pii::mask_pii;

/// JSON-line logger. INFO goes to stdout, WARN and ERROR to stderr.
#[derive(Clone)]
pub struct Logger {
    instance_id: String,
}

impl Logger {
    pub fn new(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn info(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("INFO", msg, context);
        println!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    pub fn warn(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("WARN", msg, context);
        eprintln!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    pub fn error(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("ERROR", msg, context);
        eprintln!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    fn build_entry(&self, level: &str, msg: &str, context: Option<&Value>) -> Value {
        let mut base = Map::new();
        base.insert("ts".to_string(), json!(Utc::now().to_rfc3339()));
        base.insert("level".to_string(), json!(level));
        base.insert("msg".to_string(), json!(mask_pii(msg)));
        base.insert("instance_id".to_string(), json!(self.instance_id));

        if let Some(ctx_obj) = context.and_then(Value::as_object) {
            for (k, v) in ctx_obj {
                // Reserved keys win over context
                if base.contains_key(k) {
                    continue;
                }
                let safe_v = match v.as_str() {
                    Some(s) => json!(mask_pii(s)),
                    None => v.clone(),
                };
                base.insert(k.clone(), safe_v);
            }
        }

        Value::Object(base)
    }
}
