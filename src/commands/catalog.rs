//! Commands: list managed keys (`keys`) and HAT profiles (`hats`).
use std::fmt::Write as _;

use crate::catalog::ProfileCatalog;
use crate::options::OptionModel;
use crate::store::ArtifactId;

/// Print every managed key grouped by artifact.
pub fn keys() {
    print!("{}", render_keys(&OptionModel::builtin()));
}

/// Print every HAT profile.
pub fn hats() {
    print!(
        "{}",
        render_hats(&ProfileCatalog::builtin(OptionModel::builtin()))
    );
}

fn render_keys(model: &OptionModel) -> String {
    let mut out = String::new();
    for id in ArtifactId::ALL {
        let _ = writeln!(out, "{id}:");
        for key in model.keys_for(id) {
            let _ = writeln!(
                out,
                "  {:<18} {:<28} default {:<8} {}",
                key.name,
                key.value_type.describe(),
                key.default,
                key.description
            );
        }
    }
    out
}

fn render_hats(catalog: &ProfileCatalog) -> String {
    let mut out = String::new();
    for profile in catalog.list_profiles() {
        let _ = writeln!(out, "{:<18} {}", profile.name, profile.description);
        for (key, value) in profile.settings {
            let _ = writeln!(out, "    {key}={value}");
        }
    }
    out
}
