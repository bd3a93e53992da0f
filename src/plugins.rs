//! GStreamer plugin availability.

use eyre::{bail, Result};
use gstreamer::Registry;

/// Returns the names in `plugins` the registry doesn't know.
#[must_use]
pub fn missing<'a>(plugins: &[&'a str]) -> Vec<&'a str> {
    let registry = Registry::get();
    plugins.iter().copied().filter(|name| registry.find_plugin(name).is_none()).collect()
}

/// Fails when any of `plugins` is missing, logging each one.
pub fn check(plugins: &[&str]) -> Result<()> {
    let missing = missing(plugins);
    for name in &missing {
        tracing::error!("Missing GStreamer plugin: {name}");
    }
    if !missing.is_empty() {
        bail!("missing GStreamer plugins: {}", missing.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_elements_are_found() {
        gstreamer::init().unwrap();
        assert!(missing(&["coreelements"]).is_empty());
        assert_eq!(missing(&["coreelements", "no-such-plugin"]), vec!["no-such-plugin"]);
        assert!(check(&["no-such-plugin"]).is_err());
    }
}
