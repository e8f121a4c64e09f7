//! Cloud Trace Service resources

pub mod notification;
pub mod tracker;

/// Append URL-encoded query pairs to a path
pub(crate) fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}?{}", path, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_encoded() {
        assert_eq!(
            with_query("v3/{project_id}/notifications/smn", &[("notification_name", "ops alerts")]),
            "v3/{project_id}/notifications/smn?notification_name=ops+alerts"
        );
    }
}
