//! Integration tests for the reconciliation pipeline.
//!
//! Tests: validated intent → ReconciliationEngine → LedgerStore transaction → stock
//!
//! Verifies:
//! - Stock always equals opening stock plus the effects of live movements
//! - Rejected operations leave stock and movements untouched
//! - A failure between the movement write and the stock write discards both
//! - Archival keeps historical movements joinable
//! - Concurrent movements on one product serialize on the product row lock

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};

    use stockledger_auth::{NewUser, User};
    use stockledger_core::{MovementId, ProductId, UserId};
    use stockledger_movements::{MovementKind, MovementRevision, MovementStatus, NewMovement, Quantity};
    use stockledger_products::{NewProduct, Product, ProductScope};

    use crate::catalog::ProductCatalog;
    use crate::error::LedgerError;
    use crate::reconciliation::{ProductRemoval, ReconciliationEngine};
    use crate::store::{FailPoint, InMemoryLedgerStore, LedgerStore};

    struct Fixture {
        store: InMemoryLedgerStore,
        engine: ReconciliationEngine<InMemoryLedgerStore>,
        catalog: ProductCatalog<InMemoryLedgerStore>,
        user: User,
    }

    async fn setup() -> Fixture {
        let store = InMemoryLedgerStore::new();
        let engine = ReconciliationEngine::new(store.clone());
        let catalog = ProductCatalog::new(store.clone());
        let user = catalog
            .import_user(NewUser {
                username: "warehouse".to_string(),
                email: "warehouse@example.com".to_string(),
            })
            .await
            .unwrap();
        Fixture {
            store,
            engine,
            catalog,
            user,
        }
    }

    impl Fixture {
        async fn product(&self, stock: u64) -> Product {
            self.catalog
                .create_product(NewProduct {
                    name: "pallet".to_string(),
                    stock,
                })
                .await
                .unwrap()
        }

        async fn stock(&self, id: ProductId) -> u64 {
            self.store
                .find_product(id, ProductScope::IncludeArchived)
                .await
                .unwrap()
                .unwrap()
                .stock
        }

        fn intent(&self, product: &Product, qty: u32) -> NewMovement {
            NewMovement {
                product_id: product.id,
                user_id: self.user.id,
                qty: q(qty),
                moved_at: day(),
            }
        }

        fn revision(&self, qty: u32) -> MovementRevision {
            MovementRevision {
                qty: q(qty),
                moved_at: day(),
                user_id: self.user.id,
                product_id: None,
            }
        }

        async fn movement_count(&self, kind: MovementKind) -> usize {
            self.store.list_movements(kind).await.unwrap().len()
        }
    }

    fn q(v: u32) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()
    }

    #[tokio::test]
    async fn outgoing_beyond_stock_is_rejected_and_stock_unchanged() {
        let fx = setup().await;
        let product = fx.product(3).await;

        let err = fx
            .engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 4))
            .await
            .unwrap_err();

        match err {
            LedgerError::InvalidStock { stock, delta } => {
                assert_eq!(stock, 3);
                assert_eq!(delta, -4);
            }
            other => panic!("Expected InvalidStock, got {other:?}"),
        }
        assert_eq!(fx.stock(product.id).await, 3);
        assert_eq!(fx.movement_count(MovementKind::Outgoing).await, 0);
    }

    #[tokio::test]
    async fn incoming_update_moves_stock_by_quantity_difference() {
        let fx = setup().await;
        let product = fx.product(0).await;

        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 10))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 10);

        let id = created.movement.id;
        let down = fx
            .engine
            .update_movement(MovementKind::Incoming, id, fx.revision(4))
            .await
            .unwrap();
        assert_eq!(down.product.stock, 4);
        assert_eq!(fx.stock(product.id).await, 4);

        fx.engine
            .update_movement(MovementKind::Incoming, id, fx.revision(15))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 15);
    }

    #[tokio::test]
    async fn outgoing_update_takes_more_stock_when_raised() {
        let fx = setup().await;
        let product = fx.product(10).await;

        let created = fx
            .engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 3))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 7);

        fx.engine
            .update_movement(MovementKind::Outgoing, created.movement.id, fx.revision(5))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 5);

        let err = fx
            .engine
            .update_movement(MovementKind::Outgoing, created.movement.id, fx.revision(11))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_stock");
        assert_eq!(fx.stock(product.id).await, 5);
        let stored = fx
            .store
            .find_movement(MovementKind::Outgoing, created.movement.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.qty, q(5));
    }

    #[tokio::test]
    async fn cancel_reverses_effect_once() {
        let fx = setup().await;
        let product = fx.product(0).await;

        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 5))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 5);

        let cancelled = fx
            .engine
            .cancel_movement(MovementKind::Incoming, created.movement.id)
            .await
            .unwrap();
        assert_eq!(cancelled.movement.status, MovementStatus::Cancelled);
        assert_eq!(fx.stock(product.id).await, 0);

        let err = fx
            .engine
            .cancel_movement(MovementKind::Incoming, created.movement.id)
            .await
            .unwrap_err();
        match err {
            LedgerError::AlreadyCancelled => {}
            other => panic!("Expected AlreadyCancelled, got {other:?}"),
        }
        assert_eq!(fx.stock(product.id).await, 0);

        // The record is retained.
        let listed = fx
            .engine
            .list_movements(MovementKind::Incoming, Some(created.movement.id))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].movement.status, MovementStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_incoming_fails_when_stock_already_consumed() {
        let fx = setup().await;
        let product = fx.product(0).await;

        let incoming = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 5))
            .await
            .unwrap();
        fx.engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 4))
            .await
            .unwrap();

        let err = fx
            .engine
            .cancel_movement(MovementKind::Incoming, incoming.movement.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_stock");
        assert_eq!(fx.stock(product.id).await, 1);
        let stored = fx
            .store
            .find_movement(MovementKind::Incoming, incoming.movement.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MovementStatus::Succeed);
    }

    #[tokio::test]
    async fn updating_cancelled_movement_is_rejected() {
        let fx = setup().await;
        let product = fx.product(9).await;

        let created = fx
            .engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 2))
            .await
            .unwrap();
        fx.engine
            .cancel_movement(MovementKind::Outgoing, created.movement.id)
            .await
            .unwrap();

        let err = fx
            .engine
            .update_movement(MovementKind::Outgoing, created.movement.id, fx.revision(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "already_cancelled");
        assert_eq!(fx.stock(product.id).await, 9);
    }

    #[tokio::test]
    async fn product_reference_cannot_change_on_update() {
        let fx = setup().await;
        let first = fx.product(0).await;
        let second = fx.product(0).await;

        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&first, 3))
            .await
            .unwrap();

        let mut revision = fx.revision(8);
        revision.product_id = Some(second.id);
        match fx
            .engine
            .update_movement(MovementKind::Incoming, created.movement.id, revision)
            .await
            .unwrap_err()
        {
            LedgerError::ValidationFailed(errors) => assert!(errors.contains("product_id")),
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
        assert_eq!(fx.stock(first.id).await, 3);
        assert_eq!(fx.stock(second.id).await, 0);
    }

    #[tokio::test]
    async fn stock_write_failure_after_insert_leaves_no_movement() {
        let fx = setup().await;
        let product = fx.product(1).await;

        fx.store.fail_next(FailPoint::SaveProduct);
        let err = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 2))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "persistence_failure");
        assert!(!err.is_client_error());
        assert_eq!(fx.movement_count(MovementKind::Incoming).await, 0);
        assert_eq!(fx.stock(product.id).await, 1);

        // The next attempt goes through.
        fx.engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 2))
            .await
            .unwrap();
        assert_eq!(fx.stock(product.id).await, 3);
    }

    #[tokio::test]
    async fn movement_write_failure_on_update_leaves_stock_untouched() {
        let fx = setup().await;
        let product = fx.product(0).await;
        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 6))
            .await
            .unwrap();

        fx.store.fail_next(FailPoint::SaveMovement);
        assert!(fx
            .engine
            .update_movement(MovementKind::Incoming, created.movement.id, fx.revision(2))
            .await
            .is_err());

        assert_eq!(fx.stock(product.id).await, 6);
        let stored = fx
            .store
            .find_movement(MovementKind::Incoming, created.movement.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.qty, q(6));
    }

    #[tokio::test]
    async fn delete_without_history_removes_product() {
        let fx = setup().await;
        let product = fx.product(4).await;

        let removal = fx.engine.delete_product(product.id).await.unwrap();
        assert_eq!(removal, ProductRemoval::Deleted(product.id));
        assert!(fx
            .store
            .find_product(product.id, ProductScope::IncludeArchived)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_with_history_archives_and_keeps_join() {
        let fx = setup().await;
        let product = fx.product(0).await;
        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 2))
            .await
            .unwrap();

        let removal = fx.engine.delete_product(product.id).await.unwrap();
        let archived = match removal {
            ProductRemoval::Archived(p) => p,
            other => panic!("Expected Archived, got {other:?}"),
        };
        assert!(archived.is_archived());
        assert_eq!(archived.stock, 2);

        // Gone from the catalog ...
        assert_eq!(
            fx.catalog.get_product(product.id).await.unwrap_err().kind(),
            "product_not_found"
        );
        assert!(fx.catalog.list_products().await.unwrap().is_empty());

        // ... but still joined by movement listing.
        let listed = fx.engine.list_movements(MovementKind::Incoming, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].movement.id, created.movement.id);
        assert_eq!(listed[0].product.id, product.id);
        assert!(listed[0].product.is_archived());
        assert_eq!(listed[0].user, fx.user);

        // Deleting again is not found.
        assert_eq!(
            fx.engine.delete_product(product.id).await.unwrap_err().kind(),
            "product_not_found"
        );
    }

    #[tokio::test]
    async fn archived_product_rejects_new_and_existing_movements() {
        let fx = setup().await;
        let product = fx.product(0).await;
        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 2))
            .await
            .unwrap();
        fx.engine.delete_product(product.id).await.unwrap();

        let create = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 1))
            .await
            .unwrap_err();
        assert_eq!(create.kind(), "product_not_found");

        let update = fx
            .engine
            .update_movement(MovementKind::Incoming, created.movement.id, fx.revision(1))
            .await
            .unwrap_err();
        assert_eq!(update.kind(), "product_not_found");

        let cancel = fx
            .engine
            .cancel_movement(MovementKind::Incoming, created.movement.id)
            .await
            .unwrap_err();
        assert_eq!(cancel.kind(), "product_not_found");
        assert_eq!(fx.stock(product.id).await, 2);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let fx = setup().await;
        let ghost = Product::create(
            ProductId::new(),
            NewProduct {
                name: "ghost".to_string(),
                stock: 0,
            },
            Utc::now(),
        )
        .unwrap();

        let create = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&ghost, 1))
            .await
            .unwrap_err();
        assert_eq!(create.kind(), "product_not_found");

        let missing = MovementId::new();
        for kind in MovementKind::ALL {
            assert_eq!(
                fx.engine.get_movement(kind, missing).await.unwrap_err().kind(),
                "movement_not_found"
            );
            assert_eq!(
                fx.engine
                    .update_movement(kind, missing, fx.revision(1))
                    .await
                    .unwrap_err()
                    .kind(),
                "movement_not_found"
            );
        }
    }

    #[tokio::test]
    async fn update_can_reassign_acting_user() {
        let fx = setup().await;
        let product = fx.product(0).await;
        let other = fx
            .catalog
            .import_user(NewUser {
                username: "nightshift".to_string(),
                email: "night@example.com".to_string(),
            })
            .await
            .unwrap();
        let created = fx
            .engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 1))
            .await
            .unwrap();

        let mut revision = fx.revision(1);
        revision.user_id = other.id;
        let updated = fx
            .engine
            .update_movement(MovementKind::Incoming, created.movement.id, revision)
            .await
            .unwrap();
        assert_eq!(updated.user, other);
        assert_eq!(updated.movement.user_id, other.id);

        let mut revision = fx.revision(1);
        revision.user_id = UserId::new();
        assert_eq!(
            fx.engine
                .update_movement(MovementKind::Incoming, created.movement.id, revision)
                .await
                .unwrap_err()
                .kind(),
            "validation_failed"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_outgoing_movements_serialize_on_product() {
        let fx = setup().await;
        let product = fx.product(5).await;
        let engine = Arc::new(fx.engine.clone());

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = Arc::clone(&engine);
            let intent = fx.intent(&product, 4);
            handles.push(tokio::spawn(async move {
                engine.create_movement(MovementKind::Outgoing, intent).await
            }));
        }

        let mut succeeded = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::InvalidStock { .. }) => rejected += 1,
                Err(other) => panic!("Expected InvalidStock, got {other:?}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(rejected, 1);
        assert_eq!(fx.stock(product.id).await, 1);
        assert_eq!(fx.movement_count(MovementKind::Outgoing).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_concurrent_movements_keep_stock_consistent() {
        let fx = setup().await;
        let product = fx.product(50).await;
        let engine = Arc::new(fx.engine.clone());

        let mut handles = Vec::new();
        for i in 0..40u32 {
            let engine = Arc::clone(&engine);
            let kind = if i % 2 == 0 { MovementKind::Outgoing } else { MovementKind::Incoming };
            let intent = fx.intent(&product, 1 + i % 7);
            handles.push(tokio::spawn(async move { engine.create_movement(kind, intent).await }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let mut expected: i64 = 50;
        for kind in MovementKind::ALL {
            for m in fx.store.list_movements(kind).await.unwrap() {
                expected += m.stock_effect();
            }
        }
        assert_eq!(fx.stock(product.id).await as i64, expected);
    }

    #[tokio::test]
    async fn listing_returns_only_requested_kind_in_creation_order() {
        let fx = setup().await;
        let product = fx.product(10).await;

        let a = fx
            .engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 1))
            .await
            .unwrap();
        fx.engine
            .create_movement(MovementKind::Incoming, fx.intent(&product, 1))
            .await
            .unwrap();
        let b = fx
            .engine
            .create_movement(MovementKind::Outgoing, fx.intent(&product, 2))
            .await
            .unwrap();

        let listed = fx.engine.list_movements(MovementKind::Outgoing, None).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.movement.id).collect();
        assert_eq!(ids, vec![a.movement.id, b.movement.id]);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Create(bool, u32),
            Update(usize, u32),
            Cancel(usize),
            Correct(u64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (any::<bool>(), 1u32..20).prop_map(|(incoming, qty)| Op::Create(incoming, qty)),
                3 => (any::<usize>(), 1u32..20).prop_map(|(idx, qty)| Op::Update(idx, qty)),
                2 => any::<usize>().prop_map(Op::Cancel),
                1 => (0u64..30).prop_map(Op::Correct),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: after any operation sequence, stock == baseline + Σ live effects,
            /// where the baseline is the opening stock or the last explicit correction.
            #[test]
            fn stock_matches_movement_history(opening in 0u64..20, ops in proptest::collection::vec(op(), 1..25)) {
                let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
                rt.block_on(async move {
                    let fx = setup().await;
                    let product = fx.product(opening).await;
                    let mut created: Vec<(MovementKind, MovementId)> = Vec::new();

                    // Sum of live effects at the time of the last correction.
                    let mut baseline = opening as i64;
                    let mut effects_at_baseline: i64 = 0;

                    for op in ops {
                        match op {
                            Op::Create(incoming, qty) => {
                                let kind = if incoming { MovementKind::Incoming } else { MovementKind::Outgoing };
                                if let Ok(record) = fx.engine.create_movement(kind, fx.intent(&product, qty)).await {
                                    created.push((kind, record.movement.id));
                                }
                            }
                            Op::Update(idx, qty) if !created.is_empty() => {
                                let (kind, id) = created[idx % created.len()];
                                let _ = fx.engine.update_movement(kind, id, fx.revision(qty)).await;
                            }
                            Op::Cancel(idx) if !created.is_empty() => {
                                let (kind, id) = created[idx % created.len()];
                                let _ = fx.engine.cancel_movement(kind, id).await;
                            }
                            Op::Correct(stock) => {
                                let patch = stockledger_products::ProductPatch { name: None, stock: Some(stock) };
                                fx.catalog.update_product(product.id, patch).await.unwrap();
                                baseline = stock as i64;
                                effects_at_baseline = live_effects(&fx).await;
                            }
                            _ => {}
                        }

                        let stock = fx.stock(product.id).await as i64;
                        assert_eq!(stock, baseline + live_effects(&fx).await - effects_at_baseline);
                        assert!(stock >= 0);
                    }
                });
            }
        }

        async fn live_effects(fx: &Fixture) -> i64 {
            let mut sum = 0;
            for kind in MovementKind::ALL {
                for m in fx.store.list_movements(kind).await.unwrap() {
                    sum += m.stock_effect();
                }
            }
            sum
        }
    }

    /// Runs against a real database: `DATABASE_URL=postgres://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn postgres_store_reconciles_stock() {
        use crate::store::PostgresLedgerStore;

        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PostgresLedgerStore::connect(&url, 4).await.unwrap();
        store.ensure_schema().await.unwrap();

        let engine = ReconciliationEngine::new(store.clone());
        let catalog = ProductCatalog::new(store.clone());
        let suffix = ProductId::new();
        let user = catalog
            .import_user(NewUser {
                username: format!("pg-{suffix}"),
                email: format!("pg-{suffix}@example.com"),
            })
            .await
            .unwrap();
        let product = catalog
            .create_product(NewProduct {
                name: "pg pallet".to_string(),
                stock: 5,
            })
            .await
            .unwrap();

        let intent = NewMovement {
            product_id: product.id,
            user_id: user.id,
            qty: q(4),
            moved_at: day(),
        };
        let created = engine
            .create_movement(MovementKind::Outgoing, intent.clone())
            .await
            .unwrap();
        assert_eq!(created.product.stock, 1);

        let err = engine
            .create_movement(MovementKind::Outgoing, intent)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_stock");

        engine
            .cancel_movement(MovementKind::Outgoing, created.movement.id)
            .await
            .unwrap();
        assert_eq!(catalog.get_product(product.id).await.unwrap().stock, 5);

        match engine.delete_product(product.id).await.unwrap() {
            ProductRemoval::Archived(p) => assert!(p.is_archived()),
            other => panic!("Expected Archived, got {other:?}"),
        }
        let listed = engine
            .list_movements(MovementKind::Outgoing, Some(created.movement.id))
            .await
            .unwrap();
        assert!(listed[0].product.is_archived());
    }
}
