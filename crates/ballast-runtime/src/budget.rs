//! Eviction pacing derived from PodDisruptionBudgets.

use ballast_core::labels::selector_matches;
use ballast_core::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// First budget in `budgets` whose selector matches the pod's labels
pub fn matching_budget<'a>(
    budgets: &'a [PodDisruptionBudget],
    pod: &Pod,
) -> Option<&'a PodDisruptionBudget> {
    let empty = BTreeMap::new();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);

    budgets.iter().find(|budget| {
        budget
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .is_some_and(|selector| selector_matches(selector, labels))
    })
}

/// How many evictions of one workload may be in flight at once
///
/// `replicas - minAvailable`, where `minAvailable` comes from the budget
/// directly or as `replicas - maxUnavailable`. Percentages are taken of
/// `replicas` and rounded up. Never less than 1, so a budget that allows no
/// disruption still makes progress one pod at a time as the API server
/// admits evictions.
pub fn eviction_concurrency(budget: &PodDisruptionBudget, replicas: u32) -> usize {
    let Some(spec) = budget.spec.as_ref() else {
        return 1;
    };

    let replicas = i64::from(replicas);
    let min_available = match (&spec.min_available, &spec.max_unavailable) {
        (Some(min), _) => resolve(min, replicas),
        (None, Some(max)) => replicas - resolve(max, replicas),
        (None, None) => replicas,
    };

    (replicas - min_available).max(1) as usize
}

/// Resolve an absolute or percentage value against `total`, rounding up
fn resolve(value: &IntOrString, total: i64) -> i64 {
    match value {
        IntOrString::Int(n) => i64::from(*n),
        IntOrString::String(s) => match s.strip_suffix('%').and_then(|p| p.parse::<i64>().ok()) {
            Some(percent) => (total * percent + 99) / 100,
            // Unparseable values allow no parallelism
            None => total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::mock::pod_owned_by;
    use k8s_openapi::api::policy::v1::PodDisruptionBudgetSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn budget(min: Option<IntOrString>, max: Option<IntOrString>) -> PodDisruptionBudget {
        PodDisruptionBudget {
            spec: Some(PodDisruptionBudgetSpec {
                min_available: min,
                max_unavailable: max,
                selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_min_available_absolute() {
        assert_eq!(eviction_concurrency(&budget(Some(IntOrString::Int(3)), None), 5), 2);
        assert_eq!(eviction_concurrency(&budget(Some(IntOrString::Int(5)), None), 5), 1);
    }

    #[test]
    fn test_max_unavailable_absolute() {
        assert_eq!(eviction_concurrency(&budget(None, Some(IntOrString::Int(2))), 6), 2);
        assert_eq!(eviction_concurrency(&budget(None, Some(IntOrString::Int(0))), 6), 1);
    }

    #[test]
    fn test_percentages_round_up() {
        // minAvailable 50% of 5 = 3 (rounded up) -> 2 in flight
        let b = budget(Some(IntOrString::String("50%".to_string())), None);
        assert_eq!(eviction_concurrency(&b, 5), 2);

        // maxUnavailable 30% of 4 = 2 (rounded up) -> 2 in flight
        let b = budget(None, Some(IntOrString::String("30%".to_string())));
        assert_eq!(eviction_concurrency(&b, 4), 2);
    }

    #[test]
    fn test_matching_budget_by_selector() {
        let budgets = vec![budget(Some(IntOrString::Int(1)), None)];

        let web = pod_owned_by("web-0", "default", "StatefulSet", "web");
        let db = pod_owned_by("db-0", "default", "StatefulSet", "db");

        assert!(matching_budget(&budgets, &web).is_some());
        assert!(matching_budget(&budgets, &db).is_none());
    }
}
