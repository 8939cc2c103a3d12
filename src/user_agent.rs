//! Shared User-Agent strings for the transfer and control-plane HTTP clients.
//!
//! Single source for the UA format so file fetches and auth/discovery calls
//! identify the worker the same way in remote access logs.

/// Product token used in every User-Agent.
const PRODUCT: &str = "packsync";

/// Default User-Agent for data-package transfers.
#[must_use]
pub(crate) fn default_transfer_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (gis-cache-sync; transfer)")
}

/// Default User-Agent for authentication and file-discovery requests.
#[must_use]
pub(crate) fn default_control_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (gis-cache-sync; control)")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_both_agents_carry_crate_version() {
        for ua in [default_transfer_user_agent(), default_control_user_agent()] {
            let version = ua
                .strip_prefix("packsync/")
                .and_then(|s| s.split(' ').next())
                .unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"), "bad UA: {ua}");
        }
    }

    #[test]
    fn test_agents_distinguish_traffic_kind() {
        assert!(default_transfer_user_agent().ends_with("transfer)"));
        assert!(default_control_user_agent().ends_with("control)"));
    }
}
