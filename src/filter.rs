use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{FilterFailurePolicy, JmespathFilter};

/// The tree a filter expression is evaluated against: the admitted object
/// (with its namespace defaulted from the admission request) and the
/// container currently under consideration. Both are pre-serialized so the
/// query language only ever sees primitives.
#[derive(Debug, Serialize)]
pub struct FilterContext<'a> {
    pub obj: &'a Value,
    pub container: &'a Value,
}

/// Returns true when one of `filters` matches `ctx`, meaning the container
/// is skipped. Predicates are evaluated in order and the first strict
/// boolean `true` wins. Non-boolean results are logged and skipped. A
/// predicate that fails to compile or evaluate terminates evaluation with
/// `on_failure` deciding the verdict (the default fails closed: the image
/// gets processed).
pub fn matches(
    ctx: &FilterContext<'_>,
    filters: &[JmespathFilter],
    on_failure: FilterFailurePolicy,
) -> bool {
    if filters.is_empty() {
        return false;
    }

    let data = match jmespath::Variable::from_serializable(ctx) {
        Ok(variable) => jmespath::Rcvar::new(variable),
        Err(err) => {
            error!(%err, "could not encode filter context");
            return failure_verdict(on_failure);
        }
    };
    debug!(context = ?data, "generated filter context");

    for (idx, filter) in filters.iter().enumerate() {
        let expression = match jmespath::compile(&filter.jmespath) {
            Ok(expression) => expression,
            Err(err) => {
                error!(filter = %filter.jmespath, idx, %err, "filter could not be compiled");
                return failure_verdict(on_failure);
            }
        };

        let result = match expression.search(data.clone()) {
            Ok(result) => result,
            Err(err) => {
                error!(filter = %filter.jmespath, idx, %err, "filter could not be evaluated");
                return failure_verdict(on_failure);
            }
        };

        match result.as_boolean() {
            Some(true) => return true,
            Some(false) => {}
            None => {
                warn!(filter = %filter.jmespath, "filter does not return a bool value");
            }
        }
    }

    false
}

fn failure_verdict(policy: FilterFailurePolicy) -> bool {
    // `Skip` treats a broken filter as a match (fail open); `Process` lets
    // the image continue through the pipeline (fail closed).
    matches!(policy, FilterFailurePolicy::Skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(exprs: &[&str]) -> Vec<JmespathFilter> {
        exprs
            .iter()
            .map(|e| JmespathFilter {
                jmespath: e.to_string(),
            })
            .collect()
    }

    fn ctx_values(namespace: &str) -> (Value, Value) {
        let obj = json!({
            "metadata": {"name": "web", "namespace": namespace},
            "spec": {"containers": [{"name": "nginx", "image": "nginx"}]},
        });
        let container = json!({"name": "nginx", "image": "nginx"});
        (obj, container)
    }

    #[test]
    fn empty_filter_list_never_matches() {
        let (obj, container) = ctx_values("default");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        assert!(!matches(&ctx, &[], FilterFailurePolicy::Process));
    }

    #[test]
    fn namespace_filter_matches() {
        let (obj, container) = ctx_values("kube-system");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["obj.metadata.namespace == 'kube-system'"]);
        assert!(matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn namespace_filter_misses_other_namespaces() {
        let (obj, container) = ctx_values("default");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["obj.metadata.namespace == 'kube-system'"]);
        assert!(!matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn non_boolean_result_is_not_a_match() {
        let (obj, container) = ctx_values("default");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["obj"]);
        assert!(!matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn evaluation_continues_past_non_boolean_results() {
        let (obj, container) = ctx_values("default");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["obj", "container.name == 'nginx'"]);
        assert!(matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn first_match_short_circuits() {
        let (obj, container) = ctx_values("kube-system");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        // The second expression would fail to compile; it must never run.
        let fs = filters(&["obj.metadata.namespace == 'kube-system'", "((("]);
        assert!(matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn broken_filter_fails_closed_by_default() {
        let (obj, container) = ctx_values("kube-system");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["((("]);
        assert!(!matches(&ctx, &fs, FilterFailurePolicy::Process));
    }

    #[test]
    fn broken_filter_fails_open_when_configured() {
        let (obj, container) = ctx_values("kube-system");
        let ctx = FilterContext {
            obj: &obj,
            container: &container,
        };
        let fs = filters(&["((("]);
        assert!(matches(&ctx, &fs, FilterFailurePolicy::Skip));
    }
}
