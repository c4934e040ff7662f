mod common;

use common::{days_from_today, today, TestContext};
use medstock::services::stock_accessor::StockScope;

#[tokio::test]
async fn totals_sum_across_locations_and_dates() {
    let ctx = TestContext::new().await;
    let amox = ctx.medicine("Amoxicillin", 20, true, Some(50)).await;
    let other = ctx.medicine("Cetirizine", 5, false, None).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;

    ctx.receive(amox.id, shelf.id, 10, days_from_today(5)).await;
    ctx.receive(amox.id, shelf.id, 15, days_from_today(60)).await;
    ctx.receive(amox.id, fridge.id, 7, days_from_today(60)).await;
    ctx.receive(other.id, shelf.id, 2, days_from_today(60)).await;

    let accessor = &ctx.services.accessor;
    assert_eq!(accessor.total_quantity(StockScope::Medicine(amox.id)).await.unwrap(), 32);
    assert_eq!(accessor.total_quantity(StockScope::Location(shelf.id)).await.unwrap(), 27);
    assert_eq!(accessor.total_quantity(StockScope::Location(fridge.id)).await.unwrap(), 7);
    assert_eq!(
        accessor
            .total_quantity(StockScope::Shelf {
                medicine_id: amox.id,
                location_id: shelf.id
            })
            .await
            .unwrap(),
        25
    );
    assert_eq!(accessor.total_quantity(StockScope::All).await.unwrap(), 34);
}

#[tokio::test]
async fn totals_are_zero_without_batches() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 5, false, None).await;
    let shelf = ctx.location("Shelf A").await;

    let accessor = &ctx.services.accessor;
    assert_eq!(accessor.total_quantity(StockScope::Medicine(medicine.id)).await.unwrap(), 0);
    assert_eq!(accessor.total_quantity(StockScope::Location(shelf.id)).await.unwrap(), 0);
    assert_eq!(accessor.earliest_expiration(medicine.id).await.unwrap(), None);
    assert!(accessor.distinct_expiration_dates(medicine.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn receiving_raises_total_by_exactly_the_received_quantity() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 5, false, None).await;
    let shelf = ctx.location("Shelf A").await;
    ctx.receive(medicine.id, shelf.id, 9, days_from_today(5)).await;

    let accessor = &ctx.services.accessor;
    let before = accessor.total_quantity(StockScope::Medicine(medicine.id)).await.unwrap();
    ctx.receive(medicine.id, shelf.id, 13, days_from_today(8)).await;
    let after = accessor.total_quantity(StockScope::Medicine(medicine.id)).await.unwrap();

    assert_eq!(after - before, 13);
}

#[tokio::test]
async fn expiration_queries_ignore_empty_batches() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 0, false, None).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;

    let soon = days_from_today(3);
    let later = days_from_today(40);
    let latest = days_from_today(90);
    let emptied = ctx.receive(medicine.id, shelf.id, 2, soon).await;
    ctx.receive(medicine.id, shelf.id, 4, later).await;
    ctx.receive(medicine.id, fridge.id, 1, later).await;
    ctx.receive(medicine.id, fridge.id, 6, latest).await;

    ctx.services
        .mutator
        .adjust_batch_quantity(emptied.id, 0)
        .await
        .unwrap();

    let accessor = &ctx.services.accessor;
    assert_eq!(accessor.earliest_expiration(medicine.id).await.unwrap(), Some(later));
    assert_eq!(
        accessor.distinct_expiration_dates(medicine.id).await.unwrap(),
        vec![later, latest]
    );
}

#[tokio::test]
async fn low_stock_boundary_is_strict() {
    let ctx = TestContext::new().await;
    let at = ctx.medicine("AtThreshold", 10, true, Some(5)).await;
    let under = ctx.medicine("UnderThreshold", 10, true, Some(5)).await;
    let shelf = ctx.location("Shelf A").await;

    ctx.receive(at.id, shelf.id, 10, days_from_today(30)).await;
    ctx.receive(under.id, shelf.id, 9, days_from_today(30)).await;

    let accessor = &ctx.services.accessor;
    assert!(!accessor.is_low_stock(at.id).await.unwrap());
    assert!(!accessor.needs_reorder(at.id).await.unwrap());
    assert!(accessor.is_low_stock(under.id).await.unwrap());
    assert!(accessor.needs_reorder(under.id).await.unwrap());
}

#[tokio::test]
async fn manual_medicines_are_low_but_never_need_reorder() {
    let ctx = TestContext::new().await;
    let manual = ctx.medicine("Manual", 10, false, None).await;

    let accessor = &ctx.services.accessor;
    assert!(accessor.is_low_stock(manual.id).await.unwrap());
    assert!(!accessor.needs_reorder(manual.id).await.unwrap());
}

#[tokio::test]
async fn expired_and_expiring_soon_split_at_today() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 0, false, None).await;
    let shelf = ctx.location("Shelf A").await;

    let yesterday = ctx.receive(medicine.id, shelf.id, 1, days_from_today(-1)).await;
    let today_batch = ctx.receive(medicine.id, shelf.id, 1, today()).await;
    let edge = ctx.receive(medicine.id, shelf.id, 1, days_from_today(30)).await;
    ctx.receive(medicine.id, shelf.id, 1, days_from_today(31)).await;
    let empty_expired = ctx.receive(medicine.id, shelf.id, 1, days_from_today(-5)).await;
    ctx.services
        .mutator
        .adjust_batch_quantity(empty_expired.id, 0)
        .await
        .unwrap();

    let accessor = &ctx.services.accessor;
    let expired = accessor
        .expired_batches(StockScope::Medicine(medicine.id), Some(today()))
        .await
        .unwrap();
    assert_eq!(expired.iter().map(|b| b.id).collect::<Vec<_>>(), vec![yesterday.id]);

    let soon = accessor
        .expiring_soon_batches(StockScope::Medicine(medicine.id), Some(today()), 30)
        .await
        .unwrap();
    assert_eq!(
        soon.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![today_batch.id, edge.id]
    );

    let zero_window = accessor
        .expiring_soon_batches(StockScope::Location(shelf.id), Some(today()), 0)
        .await
        .unwrap();
    assert_eq!(
        zero_window.iter().map(|b| b.id).collect::<Vec<_>>(),
        vec![today_batch.id]
    );
}

#[tokio::test]
async fn negative_window_is_rejected() {
    let ctx = TestContext::new().await;
    let result = ctx
        .services
        .accessor
        .expiring_soon_batches(StockScope::All, None, -1)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn below_alert_threshold_aggregates_per_medicine() {
    let ctx = TestContext::new().await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;

    let split_low = ctx.medicine("SplitLow", 20, true, Some(40)).await;
    let split_ok = ctx.medicine("SplitOk", 20, false, None).await;
    let never_stocked = ctx.medicine("NeverStocked", 1, false, None).await;
    let zero_threshold = ctx.medicine("ZeroThreshold", 0, false, None).await;

    ctx.receive(split_low.id, shelf.id, 10, days_from_today(10)).await;
    ctx.receive(split_low.id, fridge.id, 9, days_from_today(10)).await;
    ctx.receive(split_ok.id, shelf.id, 10, days_from_today(10)).await;
    ctx.receive(split_ok.id, fridge.id, 10, days_from_today(20)).await;

    let low = ctx.services.accessor.below_alert_threshold().await.unwrap();
    let ids: Vec<i64> = low.iter().map(|m| m.medicine_id).collect();

    assert_eq!(ids, vec![split_low.id, never_stocked.id]);
    assert!(!ids.contains(&zero_threshold.id));
    assert_eq!(low[0].total_quantity, 19);
    assert_eq!(low[0].shortfall(), 1);
    assert!(low[0].automatic_reorder);
    assert_eq!(low[1].total_quantity, 0);
}

#[tokio::test]
async fn snapshot_collects_the_stock_picture() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Amoxicillin", 20, true, Some(50)).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;
    let first = days_from_today(5);
    let second = days_from_today(60);

    ctx.receive(medicine.id, shelf.id, 10, first).await;
    ctx.receive(medicine.id, fridge.id, 15, second).await;

    let snapshot = ctx.services.accessor.snapshot(medicine.id).await.unwrap();
    assert_eq!(snapshot.total_quantity, 25);
    assert_eq!(snapshot.earliest_expiration, Some(first));
    assert_eq!(snapshot.expiration_dates, vec![first, second]);
    assert_eq!(snapshot.locations.len(), 2);
    assert!(!snapshot.is_low_stock);
    assert!(!snapshot.needs_reorder);
}

#[tokio::test]
async fn snapshot_of_unknown_medicine_is_not_found() {
    let ctx = TestContext::new().await;
    let result = ctx.services.accessor.snapshot(4_242).await;
    assert!(matches!(
        result,
        Err(medstock::errors::ServiceError::NotFound(_))
    ));
}
