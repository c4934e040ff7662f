mod common;

use assert_matches::assert_matches;
use common::{days_from_today, new_medicine, TestContext};
use medstock::{
    errors::ServiceError,
    services::catalog::{LocationUpdate, MedicineUpdate, NewLocation, NewProvider},
};

#[tokio::test]
async fn invalid_medicine_input_is_rejected() {
    let ctx = TestContext::new().await;

    let mut input = new_medicine("Amoxicillin", 20, true, None);
    assert_matches!(
        ctx.services.catalog.create_medicine(input.clone()).await,
        Err(ServiceError::ValidationError(_))
    );

    input.reorder_quantity = Some(50);
    input.name = String::new();
    assert_matches!(
        ctx.services.catalog.create_medicine(input).await,
        Err(ServiceError::ValidationError(_))
    );

    let negative = new_medicine("Cetirizine", -1, false, None);
    assert_matches!(
        ctx.services.catalog.create_medicine(negative).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn duplicate_barcode_is_a_constraint_violation() {
    let ctx = TestContext::new().await;
    ctx.medicine("Amoxicillin", 20, true, Some(50)).await;

    let mut duplicate = new_medicine("Other", 5, false, None);
    duplicate.barcode = "BC-AMOXICILLIN".to_string();

    assert_matches!(
        ctx.services.catalog.create_medicine(duplicate).await,
        Err(ServiceError::ConstraintViolation(_))
    );
}

#[tokio::test]
async fn duplicate_location_name_is_a_constraint_violation() {
    let ctx = TestContext::new().await;
    ctx.location("Shelf A").await;

    let result = ctx
        .services
        .catalog
        .create_location(NewLocation {
            name: "Shelf A".to_string(),
            description: Some("again".to_string()),
        })
        .await;

    assert_matches!(result, Err(ServiceError::ConstraintViolation(_)));
}

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let ctx = TestContext::new().await;
    let mut input = new_medicine("Amoxicillin", 20, false, None);
    input.provider_id = Some(99);

    assert_matches!(
        ctx.services.catalog.create_medicine(input).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn disabling_quantity_while_automatic_is_rejected() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 5, false, None).await;

    let result = ctx
        .services
        .catalog
        .update_medicine(
            medicine.id,
            MedicineUpdate {
                automatic_reorder: Some(true),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let unchanged = ctx.services.catalog.get_medicine(medicine.id).await.unwrap();
    assert!(!unchanged.automatic_reorder);
}

#[tokio::test]
async fn update_of_unknown_medicine_is_not_found() {
    let ctx = TestContext::new().await;
    let result = ctx
        .services
        .catalog
        .update_medicine(
            77,
            MedicineUpdate {
                name: Some("Ghost".into()),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn deleting_a_medicine_removes_its_batches() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Amoxicillin", 20, true, Some(50)).await;
    let keep = ctx.medicine("Cetirizine", 5, false, None).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;

    ctx.receive(medicine.id, shelf.id, 10, days_from_today(5)).await;
    ctx.receive(medicine.id, fridge.id, 10, days_from_today(9)).await;
    ctx.receive(keep.id, shelf.id, 4, days_from_today(9)).await;

    let removed = ctx.services.catalog.delete_medicine(medicine.id).await.unwrap();

    assert_eq!(removed, 2);
    assert!(ctx.ledger(medicine.id).await.is_empty());
    assert_eq!(ctx.ledger(keep.id).await.len(), 1);
    assert_matches!(
        ctx.services.catalog.get_medicine(medicine.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn deleting_a_location_keeps_other_locations() {
    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Cetirizine", 0, false, None).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;
    ctx.receive(medicine.id, shelf.id, 3, days_from_today(5)).await;
    ctx.receive(medicine.id, fridge.id, 8, days_from_today(5)).await;

    let removal = ctx.services.catalog.delete_location(shelf.id).await.unwrap();

    assert_eq!(removal.location_id, shelf.id);
    assert_eq!(removal.batches_removed, 1);
    assert!(removal.reorders.is_empty());

    let ledger = ctx.ledger(medicine.id).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].location_id, fridge.id);
    assert_matches!(
        ctx.services.catalog.delete_location(shelf.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn renaming_a_location() {
    let ctx = TestContext::new().await;
    let shelf = ctx.location("Shelf A").await;

    let updated = ctx
        .services
        .catalog
        .update_location(
            shelf.id,
            LocationUpdate {
                name: Some("Shelf B".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "Shelf B");
    let names: Vec<String> = ctx
        .services
        .catalog
        .list_locations()
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["Shelf B".to_string()]);
}

#[tokio::test]
async fn deleting_a_provider_detaches_its_medicines() {
    let ctx = TestContext::new().await;
    let provider = ctx
        .services
        .catalog
        .create_provider(NewProvider {
            name: "Medline".into(),
            email: Some("orders@medline.example".into()),
            phone: None,
        })
        .await
        .unwrap();

    let mut input = new_medicine("Amoxicillin", 20, true, Some(50));
    input.provider_id = Some(provider.id);
    let medicine = ctx.services.catalog.create_medicine(input).await.unwrap();
    assert_eq!(medicine.provider_id, Some(provider.id));

    ctx.services.catalog.delete_provider(provider.id).await.unwrap();

    let reloaded = ctx.services.catalog.get_medicine(medicine.id).await.unwrap();
    assert_eq!(reloaded.provider_id, None);
    assert!(ctx.services.catalog.list_providers().await.unwrap().is_empty());
}

#[tokio::test]
async fn medicines_are_listed_by_name() {
    let ctx = TestContext::new().await;
    ctx.medicine("Zinc", 1, false, None).await;
    ctx.medicine("Aspirin", 1, false, None).await;
    ctx.medicine("Melatonin", 1, false, None).await;

    let names: Vec<String> = ctx
        .services
        .catalog
        .list_medicines()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();

    assert_eq!(names, vec!["Aspirin", "Melatonin", "Zinc"]);
}

#[tokio::test]
async fn location_delete_stays_committed_when_the_reorder_recheck_fails() {
    use sea_orm::ConnectionTrait;

    let ctx = TestContext::new().await;
    let medicine = ctx.medicine("Amoxicillin", 20, true, Some(50)).await;
    let shelf = ctx.location("Shelf A").await;
    let fridge = ctx.location("Fridge").await;
    ctx.receive(medicine.id, shelf.id, 5, days_from_today(30)).await;
    ctx.receive(medicine.id, fridge.id, 5, days_from_today(30)).await;

    // Break the medicine lookup the re-check depends on, leaving batches
    // and locations intact.
    ctx.db
        .execute_unprepared("PRAGMA foreign_keys = OFF")
        .await
        .unwrap();
    ctx.db
        .execute_unprepared("DROP TABLE medicines")
        .await
        .unwrap();

    let removal = ctx
        .services
        .catalog
        .delete_location(fridge.id)
        .await
        .expect("committed delete should be reported as done");

    assert_eq!(removal.batches_removed, 1);
    assert!(removal.reorders.is_empty());
    assert_matches!(
        ctx.services.catalog.get_location(fridge.id).await,
        Err(ServiceError::NotFound(_))
    );
}
