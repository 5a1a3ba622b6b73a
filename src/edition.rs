use std::fmt;

use crate::version::Version;

/// First version published under edition-specific artifact coordinates.
pub const COORDINATES_BASELINE: (u32, u32) = (8, 1);

const PUBLIC_GROUP_ID: &str = "org.sonarsource.sonarqube";
const PUBLIC_ARTIFACT_ID: &str = "sonar-application";
const COMMERCIAL_GROUP_ID: &str = "com.sonarsource.sonarqube";

/// Product tier of a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Edition {
    #[default]
    Community,
    Developer,
    Enterprise,
    #[value(name = "enterprise-lw")]
    EnterpriseLw,
    Datacenter,
}

impl Edition {
    /// Group and artifact identifiers of this edition's distribution for a
    /// given series.
    ///
    /// Commercial editions only have their own coordinates from
    /// [`COORDINATES_BASELINE`] on; earlier series and the community edition
    /// use the public coordinates.
    pub fn coordinates(self, series: &Version) -> (&'static str, &'static str) {
        let (major, minor) = COORDINATES_BASELINE;
        if self == Edition::Community || !series.is_at_least(major, minor) {
            return (PUBLIC_GROUP_ID, PUBLIC_ARTIFACT_ID);
        }
        let artifact_id = match self {
            Edition::Community => PUBLIC_ARTIFACT_ID,
            Edition::Developer => "sonarqube-developer",
            Edition::Enterprise => "sonarqube-enterprise",
            Edition::EnterpriseLw => "sonarqube-enterprise-lw",
            Edition::Datacenter => "sonarqube-datacenter",
        };
        (COMMERCIAL_GROUP_ID, artifact_id)
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Edition::Community => "community",
            Edition::Developer => "developer",
            Edition::Enterprise => "enterprise",
            Edition::EnterpriseLw => "enterprise-lw",
            Edition::Datacenter => "datacenter",
        };
        f.write_str(name)
    }
}
