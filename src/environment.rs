use std::collections::HashMap;

/// Variables that would leak options into the managed runtime.
const CONFLICTING_VARIABLES: [&str; 3] = ["JAVA_TOOL_OPTIONS", "_JAVA_OPTIONS", "JDK_JAVA_OPTIONS"];

/// Prefix of variables the server reads as configuration overrides.
const SERVER_VARIABLE_PREFIX: &str = "SONAR_";

/// Environment handed to the managed server process.
///
/// Built from the orchestrator's own environment with every variable that
/// would alter the server's runtime or configuration removed.
#[derive(Debug, Clone, Default)]
pub struct Environment(HashMap<String, String>);

impl Environment {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Copies the current process environment, minus conflicting variables.
    pub fn inherit_sanitized() -> Self {
        // non UTF-8 entries are dropped rather than panicking
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        let mut env = Self(vars.collect());
        env.sanitize();
        env
    }

    /// Removes runtime option variables and server configuration overrides.
    pub fn sanitize(&mut self) {
        self.0.retain(|key, _| !Self::is_conflicting(key));
    }

    fn is_conflicting(key: &str) -> bool {
        CONFLICTING_VARIABLES.contains(&key) || key.starts_with(SERVER_VARIABLE_PREFIX)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl From<HashMap<String, String>> for Environment {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}
