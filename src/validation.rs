//! Input validation shared by the engine and the tool surface.

use crate::config::EngineConfig;
use crate::error::ToolError;
use crate::types::{Metadata, MetadataFilter, PageRequest, TaskStatus};

pub const MAX_TASK_TITLE_LEN: usize = 2048;
pub const MAX_PROJECT_NAME_LEN: usize = 1024;
pub const MAX_LIST_IDS: usize = 20;
pub const MAX_STATUS_FILTERS: usize = 10;
pub const MAX_METADATA_FILTERS: usize = 10;
pub const MAX_METADATA_KEY_LEN: usize = 64;
/// Any number of children at this weight still sums within `i64`.
pub const MAX_WEIGHT: i64 = i32::MAX as i64;

/// Title length is counted in characters, not bytes.
pub fn validate_title(field: &str, title: &str, max_len: usize) -> Result<(), ToolError> {
    let len = title.chars().count();
    if title.trim().is_empty() {
        return Err(ToolError::invalid_value(field, &format!("{} must not be empty", field)));
    }
    if len > max_len {
        return Err(ToolError::invalid_value(
            field,
            &format!("{} must be at most {} characters (got {})", field, max_len, len),
        ));
    }
    Ok(())
}

pub fn validate_weight(weight: i64) -> Result<(), ToolError> {
    if weight <= 0 {
        return Err(ToolError::invalid_value(
            "weight",
            &format!("weight must be a positive integer (got {})", weight),
        ));
    }
    if weight > MAX_WEIGHT {
        return Err(ToolError::invalid_value(
            "weight",
            &format!("weight must be at most {} (got {})", MAX_WEIGHT, weight),
        ));
    }
    Ok(())
}

/// Metadata keys end up inside a JSON path, so only plain identifiers pass.
pub fn validate_metadata_key(key: &str) -> Result<(), ToolError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_METADATA_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ToolError::invalid_value(
            "metadata_filters",
            &format!("invalid metadata key '{}'", key),
        ));
    }
    Ok(())
}

pub fn validate_metadata_filters(filters: &[MetadataFilter]) -> Result<(), ToolError> {
    if filters.len() > MAX_METADATA_FILTERS {
        return Err(ToolError::invalid_value(
            "metadata_filters",
            &format!("at most {} metadata filters are allowed", MAX_METADATA_FILTERS),
        ));
    }
    for filter in filters {
        validate_metadata_key(&filter.key)?;
        if filter.value.is_object() || filter.value.is_array() {
            return Err(ToolError::invalid_value(
                "metadata_filters",
                &format!("filter on '{}' must compare against a scalar", filter.key),
            ));
        }
    }
    Ok(())
}

pub fn validate_statuses(statuses: &[TaskStatus]) -> Result<(), ToolError> {
    if statuses.len() > MAX_STATUS_FILTERS {
        return Err(ToolError::invalid_value(
            "statuses",
            &format!("at most {} statuses are allowed", MAX_STATUS_FILTERS),
        ));
    }
    Ok(())
}

pub fn validate_ids(ids: &[i64]) -> Result<(), ToolError> {
    if ids.len() > MAX_LIST_IDS {
        return Err(ToolError::invalid_value(
            "ids",
            &format!("at most {} ids are allowed", MAX_LIST_IDS),
        ));
    }
    Ok(())
}

/// Metadata must not be used to smuggle huge blobs; keys follow filter rules.
pub fn validate_metadata(metadata: &Metadata) -> Result<(), ToolError> {
    for key in metadata.keys() {
        validate_metadata_key(key).map_err(|_| {
            ToolError::invalid_value("metadata", &format!("invalid metadata key '{}'", key))
        })?;
    }
    Ok(())
}

/// Resolve a 1-indexed page request against the configured default and cap.
pub fn page_request(
    page: Option<i64>,
    page_size: Option<i64>,
    engine: &EngineConfig,
) -> Result<PageRequest, ToolError> {
    let page = page.unwrap_or(1);
    if page < 1 {
        return Err(ToolError::invalid_value("page", "page must be at least 1"));
    }
    let page_size = page_size.unwrap_or(i64::from(engine.default_page_size));
    if page_size < 1 || page_size > i64::from(engine.max_page_size) {
        return Err(ToolError::invalid_value(
            "page_size",
            &format!("page_size must be between 1 and {}", engine.max_page_size),
        ));
    }
    let page = u32::try_from(page)
        .map_err(|_| ToolError::invalid_value("page", "page is out of range"))?;
    Ok(PageRequest {
        page,
        page_size: page_size as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn title_bounds() {
        assert!(validate_title("title", "Ship it", MAX_TASK_TITLE_LEN).is_ok());
        assert!(validate_title("title", "   ", MAX_TASK_TITLE_LEN).is_err());

        let long = "x".repeat(MAX_TASK_TITLE_LEN + 1);
        let err = validate_title("title", &long, MAX_TASK_TITLE_LEN).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFieldValue);
        assert_eq!(err.field.as_deref(), Some("title"));

        // multibyte characters count once
        let wide = "é".repeat(MAX_TASK_TITLE_LEN);
        assert!(validate_title("title", &wide, MAX_TASK_TITLE_LEN).is_ok());
    }

    #[test]
    fn weight_must_be_positive_and_bounded() {
        assert!(validate_weight(1).is_ok());
        assert!(validate_weight(MAX_WEIGHT).is_ok());
        assert!(validate_weight(0).is_err());
        assert!(validate_weight(-4).is_err());
        assert_eq!(
            validate_weight(MAX_WEIGHT + 1).unwrap_err().field.as_deref(),
            Some("weight")
        );
        assert!(validate_weight(i64::MAX).is_err());
    }

    #[test]
    fn metadata_keys_are_identifiers() {
        assert!(validate_metadata_key("kind").is_ok());
        assert!(validate_metadata_key("sprint-2_a").is_ok());
        assert!(validate_metadata_key("").is_err());
        assert!(validate_metadata_key("a.b").is_err());
        assert!(validate_metadata_key("x' OR 1=1").is_err());
    }

    #[test]
    fn metadata_filters_limit_and_scalars() {
        let ok = vec![MetadataFilter {
            key: "kind".into(),
            op: Default::default(),
            value: json!("bug"),
        }];
        assert!(validate_metadata_filters(&ok).is_ok());

        let nested = vec![MetadataFilter {
            key: "kind".into(),
            op: Default::default(),
            value: json!({"a": 1}),
        }];
        assert!(validate_metadata_filters(&nested).is_err());

        let many: Vec<_> = (0..11)
            .map(|i| MetadataFilter {
                key: format!("k{}", i),
                op: Default::default(),
                value: json!(i),
            })
            .collect();
        assert!(validate_metadata_filters(&many).is_err());
    }

    #[test]
    fn page_defaults_and_caps() {
        let engine = EngineConfig::default();

        let page = page_request(None, None, &engine).unwrap();
        assert_eq!(page, PageRequest { page: 1, page_size: 10 });

        let page = page_request(Some(2), Some(100), &engine).unwrap();
        assert_eq!(page.page_size, 100);

        assert!(page_request(Some(0), None, &engine).is_err());
        assert!(page_request(None, Some(101), &engine).is_err());
        assert!(page_request(None, Some(0), &engine).is_err());
    }

    #[test]
    fn list_limits() {
        assert!(validate_ids(&(0..20).collect::<Vec<_>>()).is_ok());
        assert!(validate_ids(&(0..21).collect::<Vec<_>>()).is_err());
        assert!(validate_statuses(&TaskStatus::ALL).is_ok());
    }
}
