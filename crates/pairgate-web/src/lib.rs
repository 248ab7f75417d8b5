//! pairgate web - Embedded web assets
//!
//! This crate embeds the pairing dashboard into the binary.

use rust_embed::Embed;

/// Page served at `/`
pub const DASHBOARD: &str = "dashboard.html";

#[derive(Embed)]
#[folder = "www/"]
pub struct Assets;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_is_embedded() {
        let page = Assets::get(DASHBOARD).expect("dashboard embedded");
        let html = std::str::from_utf8(&page.data).unwrap();
        assert!(html.contains("/pair?"));
    }
}
