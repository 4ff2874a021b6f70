//! Kubernetes helpers shared by controllers

use kube::core::ErrorResponse;

/// True when the API server rejected a write because the object changed
/// underneath us (stale resourceVersion) or already exists (create race).
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// True when the API server reported the object does not exist
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Build an API error with the given HTTP code and reason.
///
/// Used by fakes and mocks to reproduce server responses.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

/// Label selector string (`k=v,k2=v2`) for an iterator of pairs
pub fn label_selector<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    labels
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_errors_by_code() {
        assert!(is_conflict(&api_error(409, "Conflict", "stale")));
        assert!(is_conflict(&api_error(409, "AlreadyExists", "exists")));
        assert!(!is_conflict(&api_error(404, "NotFound", "gone")));
        assert!(is_not_found(&api_error(404, "NotFound", "gone")));
        assert!(!is_not_found(&api_error(500, "InternalError", "boom")));
    }

    #[test]
    fn selector_joins_pairs() {
        assert_eq!(
            label_selector([("ofn.dev/function", "f"), ("a", "b")]),
            "ofn.dev/function=f,a=b"
        );
        assert_eq!(label_selector(Vec::<(&str, &str)>::new()), "");
    }
}
