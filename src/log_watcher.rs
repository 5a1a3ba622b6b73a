use crate::version::Version;

/// Decides whether a line of server output means the server is ready.
pub trait StartupLogWatcher: Send + Sync {
    fn is_started(&self, line: &str) -> bool;
}

impl<F> StartupLogWatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_started(&self, line: &str) -> bool {
        self(line)
    }
}

/// Waits for the last process of the server's startup sequence to report in.
#[derive(Debug, Clone)]
pub struct DefaultStartupLogWatcher {
    expected: &'static str,
}

impl DefaultStartupLogWatcher {
    pub fn new(version: &Version) -> Self {
        // The compute engine only starts last since 5.5
        let expected = if version.is_at_least(5, 5) {
            "Process[ce] is up"
        } else {
            "Process[web] is up"
        };
        Self { expected }
    }

    pub fn expected(&self) -> &str {
        self.expected
    }
}

impl StartupLogWatcher for DefaultStartupLogWatcher {
    fn is_started(&self, line: &str) -> bool {
        line.contains(self.expected)
    }
}
