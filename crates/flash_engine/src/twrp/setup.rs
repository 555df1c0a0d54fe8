//! NanoDroid setup-file rendering
//!
//! NanoDroid packages read an install-time configuration file from the
//! data partition. Values not chosen by the operator fall back to the
//! defaults documented in
//! <https://gitlab.com/Nanolx/NanoDroid/-/blob/master/doc/AlterInstallation.md>.

use std::collections::HashMap;

pub const NANODROID_SETUP_FILENAME: &str = ".nanodroid-setup";

/// (key, default) pairs in the order the file is written
const DEFAULTS: &[(&str, &str)] = &[
    ("microg", "1"),
    ("fdroid", "1"),
    ("apps", "0"),
    ("play", "21"),
    ("overlay", "0"),
    ("zelda", "0"),
    ("mapsv1", "1"),
    ("init", "0"),
    ("gsync", "0"),
    ("swipe", "0"),
    ("forcesystem", "1"),
    ("nlpbackend", "1100"),
    ("nano", "1"),
    ("bash", "1"),
    ("utils", "1"),
    ("fonts", "0"),
];

/// Render the setup file contents, filling unset keys with their defaults
pub fn render_nanodroid_setup(setup: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (key, default) in DEFAULTS {
        let value = setup
            .get(*key)
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .unwrap_or(default);
        out.push_str(&format!("nanodroid_{}={}\n", key, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_default() {
        let rendered = render_nanodroid_setup(&HashMap::new());
        assert_eq!(rendered.lines().count(), DEFAULTS.len());
        assert!(rendered.contains("nanodroid_microg=1\n"));
        assert!(rendered.contains("nanodroid_play=21\n"));
        assert!(rendered.contains("nanodroid_nlpbackend=1100\n"));
    }

    #[test]
    fn operator_choices_override_defaults() {
        let mut setup = HashMap::new();
        setup.insert("play".to_string(), "30".to_string());
        setup.insert("gsync".to_string(), "1".to_string());
        let rendered = render_nanodroid_setup(&setup);
        assert!(rendered.contains("nanodroid_play=30\n"));
        assert!(rendered.contains("nanodroid_gsync=1\n"));
        assert!(rendered.contains("nanodroid_fdroid=1\n"));
    }
}
