//! Files pushed to managed hosts: built-in copies plus operator overrides

use std::collections::BTreeMap;

use crate::errors::ConsoleError;
use crate::filesys::dir::Dir;

pub const FILEBEAT_CONFIG: &str = "filebeat.yml";
pub const LOG_AGENT: &str = "getfilebeatlog.py";
pub const STUNNEL_UNIT: &str = "stunnel.service";

const BUILTIN: &[(&str, &str)] = &[
    (FILEBEAT_CONFIG, include_str!("../../assets/filebeat.yml")),
    (LOG_AGENT, include_str!("../../assets/getfilebeatlog.py")),
    (STUNNEL_UNIT, include_str!("../../assets/stunnel.service")),
];

/// Template lookup; a file of the same name in the override directory wins
#[derive(Debug, Clone, Default)]
pub struct Templates {
    overrides: Option<Dir>,
}

impl Templates {
    pub fn builtin() -> Self {
        Self { overrides: None }
    }

    pub fn with_overrides(dir: Dir) -> Self {
        Self {
            overrides: Some(dir),
        }
    }

    pub async fn load(&self, name: &str) -> Result<String, ConsoleError> {
        let builtin = BUILTIN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| *body)
            .ok_or_else(|| ConsoleError::NotFound(format!("template {}", name)))?;

        match &self.overrides {
            Some(dir) => dir.read_or(name, builtin).await,
            None => Ok(builtin.to_string()),
        }
    }
}

/// Substitute `{{key}}` placeholders; unknown keys are left in place
pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}
