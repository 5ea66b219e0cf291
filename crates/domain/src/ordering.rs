use crate::DomainResult;
use crate::ports::items::ItemRepository;

/// Gap left below the last order value in a stage when appending.
pub const ORDER_STEP: f64 = 10.0;

/// Computes the order for an item landing in `stage_id` directly under the
/// referenced item, or at the top of the stage when no reference is given.
///
/// A reference that does not resolve, or resolves into a different stage,
/// degrades to top-of-stage insertion; this call never fails an insert.
/// The result is the midpoint between the reference order and the next
/// order above it, so it cannot collide with an existing value.
pub async fn compute_order(
    repository: &dyn ItemRepository,
    stage_id: &str,
    above_item_id: Option<&str>,
) -> DomainResult<f64> {
    let above_order = match above_item_id {
        Some(id) if !id.is_empty() => match repository.get(id).await? {
            Some(item) if item.stage_id == stage_id => Some(item.order),
            _ => None,
        },
        _ => None,
    };

    let floor = above_order.unwrap_or(0.0);
    let ceiling = repository
        .min_order_above(stage_id, floor)
        .await?
        .unwrap_or(floor + ORDER_STEP);
    Ok(floor + (ceiling - floor) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemStatus;
    use crate::test_support::{MockItemRepository, sample_item};

    #[tokio::test]
    async fn empty_stage_starts_at_half_step() {
        let repo = MockItemRepository::default();
        let order = compute_order(&repo, "stage-1", None).await.expect("order");
        assert_eq!(order, ORDER_STEP / 2.0);
    }

    #[tokio::test]
    async fn no_reference_sorts_before_all_items() {
        let repo = MockItemRepository::default();
        repo.seed(sample_item("a", "stage-1", 4.0, ItemStatus::Active));
        repo.seed(sample_item("b", "stage-1", 8.0, ItemStatus::Active));

        let order = compute_order(&repo, "stage-1", None).await.expect("order");
        assert!(order > 0.0 && order < 4.0);
    }

    #[tokio::test]
    async fn reference_places_between_neighbours() {
        let repo = MockItemRepository::default();
        repo.seed(sample_item("a", "stage-1", 4.0, ItemStatus::Active));
        repo.seed(sample_item("b", "stage-1", 8.0, ItemStatus::Active));

        let order = compute_order(&repo, "stage-1", Some("a"))
            .await
            .expect("order");
        assert!(order > 4.0 && order < 8.0);
    }

    #[tokio::test]
    async fn reference_in_other_stage_falls_back_to_top() {
        let repo = MockItemRepository::default();
        repo.seed(sample_item("a", "stage-1", 4.0, ItemStatus::Active));
        repo.seed(sample_item("x", "stage-2", 2.0, ItemStatus::Active));

        let order = compute_order(&repo, "stage-1", Some("x"))
            .await
            .expect("order");
        assert!(order > 0.0 && order < 4.0);
    }

    #[tokio::test]
    async fn missing_reference_falls_back_to_top() {
        let repo = MockItemRepository::default();
        repo.seed(sample_item("a", "stage-1", 4.0, ItemStatus::Active));

        let order = compute_order(&repo, "stage-1", Some("ghost"))
            .await
            .expect("order");
        assert!(order > 0.0 && order < 4.0);
    }

    #[tokio::test]
    async fn repeated_inserts_below_previous_stay_dense_and_unique() {
        let repo = MockItemRepository::default();
        let mut above: Option<String> = None;
        let mut last_order = f64::MIN;
        let mut seen = std::collections::HashSet::new();

        for index in 0..10_000u32 {
            let order = compute_order(&repo, "stage-1", above.as_deref())
                .await
                .expect("order");
            assert!(order > last_order, "orders must stay strictly monotonic");
            assert!(
                seen.insert(order.to_bits()),
                "order values must never collide"
            );
            last_order = order;

            let item_id = format!("item-{index}");
            repo.seed(sample_item(&item_id, "stage-1", order, ItemStatus::Active));
            above = Some(item_id);
        }
    }
}
