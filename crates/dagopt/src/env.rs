use std::env;
use std::sync::OnceLock;

static DAGOPT_VALIDATE: OnceLock<bool> = OnceLock::new();
static DAGOPT_FIXED_POINT_MAX_ITERS: OnceLock<usize> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn validate_after_rewrite() -> bool {
    *DAGOPT_VALIDATE.get_or_init(|| match env::var("DAGOPT_VALIDATE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => true,
    })
}

pub(crate) fn fixed_point_max_iters() -> usize {
    *DAGOPT_FIXED_POINT_MAX_ITERS.get_or_init(|| {
        env::var("DAGOPT_FIXED_POINT_MAX_ITERS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|iters| *iters > 0)
            .unwrap_or(usize::MAX)
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "On"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
