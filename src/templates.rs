use tera::Tera;

use crate::config::TEMPLATE_GLOB;
use crate::error::AppError;

/// Initialize the Tera template engine from the bundled templates directory
pub fn init_templates() -> Result<Tera, AppError> {
    init_templates_from(TEMPLATE_GLOB)
}

pub fn init_templates_from(glob: &str) -> Result<Tera, AppError> {
    let tera = Tera::new(glob)?;
    if !tera.get_template_names().any(|name| name == "index.html") {
        return Err(AppError::Internal(format!(
            "index.html not found in templates matching '{}'",
            glob
        )));
    }
    Ok(tera)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_templates_load() {
        let tera = init_templates().unwrap();
        assert!(tera.get_template_names().any(|name| name == "index.html"));
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.html"), "<p>{{ x }}</p>").unwrap();
        let glob = format!("{}/**/*", dir.path().display());
        assert!(matches!(
            init_templates_from(&glob),
            Err(AppError::Internal(_))
        ));
    }
}
