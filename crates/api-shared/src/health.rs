use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health check response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Health service shared by the REST server and the CLI.
///
/// Reports the service as alive together with the number of loaded panels, so a deployment with
/// an empty or unreadable panel catalog is visible from the health endpoint.
#[derive(Clone, Debug, Default)]
pub struct HealthService;

impl HealthService {
    /// Health of a process whose catalog holds `panel_count` panels.
    pub fn check_health(panel_count: usize) -> HealthRes {
        HealthRes {
            ok: panel_count > 0,
            message: if panel_count > 0 {
                format!("Labflow is alive ({panel_count} panels loaded)")
            } else {
                "Labflow is running without any panels".into()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_loaded_panels() {
        let res = HealthService::check_health(4);
        assert!(res.ok);
        assert_eq!(res.message, "Labflow is alive (4 panels loaded)");
    }

    #[test]
    fn empty_catalog_is_unhealthy() {
        assert!(!HealthService::check_health(0).ok);
    }
}
