mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use uuid::Uuid;

use rolegate::models::escalation::{EscalationStatus, PendingEscalation};
use rolegate::models::pagination::PageParams;
use rolegate::store::{EscalationStore, InsertOutcome, StoreError, TenantStore, UserStore};

fn pending(tenant_id: Uuid, email: &str, role: &str) -> PendingEscalation {
    PendingEscalation {
        id: Uuid::new_v4(),
        tenant_id,
        user_email: email.into(),
        current_role: "user".into(),
        requested_role: role.into(),
        requested_at: Utc::now(),
    }
}

#[tokio::test]
async fn one_unresolved_request_per_user_and_role() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = common::migrated_pool(&dir).await?;
    let tenant = TenantStore::new(pool.clone()).create("acme", None).await?.tenant.id;
    let store = EscalationStore::new(pool.clone());
    let admin = Uuid::new_v4();

    let first = pending(tenant, "U@x.com", "admin");
    assert_eq!(store.insert_pending(&first).await?, InsertOutcome::Inserted);
    assert_eq!(store.insert_pending(&first).await?, InsertOutcome::AlreadyExists);
    assert_eq!(
        store.insert_pending(&pending(tenant, "u@x.com", "admin")).await?,
        InsertOutcome::DuplicateUnresolved,
        "email comparison ignores case"
    );
    assert_eq!(
        store.insert_pending(&pending(tenant, "u@x.com", "moderator")).await?,
        InsertOutcome::Inserted
    );

    assert!(store.find_unresolved(tenant, "u@x.com", "admin").await?.is_some());
    store.reject(tenant, first.id, admin).await?;
    assert!(store.find_unresolved(tenant, "u@x.com", "admin").await?.is_none());
    assert_eq!(
        store.insert_pending(&pending(tenant, "u@x.com", "admin")).await?,
        InsertOutcome::Inserted
    );
    Ok(())
}

#[tokio::test]
async fn resolution_happens_at_most_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = common::migrated_pool(&dir).await?;
    let tenant = TenantStore::new(pool.clone()).create("acme", None).await?.tenant.id;
    let user = UserStore::new(pool.clone()).create(tenant, "U", "u@x.com", &["user".into()]).await?;
    let store = EscalationStore::new(pool.clone());
    let admin = Uuid::new_v4();

    let request = pending(tenant, "u@x.com", "admin");
    store.insert_pending(&request).await?;

    let approved = store.approve_and_grant(tenant, request.id, admin, user.id, "admin").await?;
    assert_eq!(approved.status, EscalationStatus::Approved);
    assert!(approved.action);
    assert_eq!(approved.resolved_by, Some(admin));
    assert!(approved.resolved_at.is_some());

    let again = store.approve_and_grant(tenant, request.id, admin, user.id, "admin").await.unwrap_err();
    assert!(matches!(again, StoreError::VersionConflict(_)), "{again:?}");
    let rejected = store.reject(tenant, request.id, admin).await.unwrap_err();
    assert!(matches!(rejected, StoreError::VersionConflict(_)), "{rejected:?}");

    assert_eq!(store.get(tenant, request.id).await?.status, EscalationStatus::Approved);

    let other_tenant = TenantStore::new(pool.clone()).create("globex", None).await?.tenant.id;
    let missing = store.reject(other_tenant, request.id, admin).await.unwrap_err();
    assert!(matches!(missing, StoreError::NotFound(_)), "{missing:?}");
    Ok(())
}

#[tokio::test]
async fn concurrent_approve_and_reject_resolve_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = common::migrated_pool(&dir).await?;
    let tenant = TenantStore::new(pool.clone()).create("acme", None).await?.tenant.id;
    let users = UserStore::new(pool.clone());
    let store = EscalationStore::new(pool.clone());

    for n in 0..10 {
        let email = format!("u{n}@x.com");
        let user = users.create(tenant, "U", &email, &["user".into()]).await?;
        let request = pending(tenant, &email, "moderator");
        store.insert_pending(&request).await?;

        let approve = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .approve_and_grant(tenant, request.id, Uuid::new_v4(), user.id, "moderator")
                    .await
            })
        };
        let reject = {
            let store = store.clone();
            tokio::spawn(async move { store.reject(tenant, request.id, Uuid::new_v4()).await })
        };
        let (approved, rejected) = (approve.await?, reject.await?);

        // the loser sees the resolution, or the database lock if it raced the
        // winner's commit
        assert!(approved.is_ok() ^ rejected.is_ok(), "exactly one resolution wins");

        let stored = store.get(tenant, request.id).await?;
        let holds = users.get(tenant, user.id).await?.holds_role("moderator");
        match stored.status {
            EscalationStatus::Approved => assert!(approved.is_ok() && holds),
            EscalationStatus::Rejected => assert!(rejected.is_ok() && !holds),
            EscalationStatus::Pending => panic!("request left unresolved"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn admin_listing_puts_pending_first_then_newest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = common::migrated_pool(&dir).await?;
    let tenant = TenantStore::new(pool.clone()).create("acme", None).await?.tenant.id;
    let store = EscalationStore::new(pool.clone());
    let now = Utc::now();

    let mut ids = Vec::new();
    for (n, minutes_ago) in [30, 20, 10].into_iter().enumerate() {
        let mut request = pending(tenant, &format!("u{n}@x.com"), "admin");
        request.requested_at = now - Duration::minutes(minutes_ago);
        store.insert_pending(&request).await?;
        ids.push(request.id);
    }
    // newest is resolved, so it sorts after the pending ones
    store.reject(tenant, ids[2], Uuid::new_v4()).await?;

    let (items, total) = store.list(tenant, None, PageParams::new(Some(1), Some(10))).await?;
    assert_eq!(total, 3);
    let order: Vec<Uuid> = items.iter().map(|r| r.id).collect();
    assert_eq!(order, vec![ids[1], ids[0], ids[2]]);

    let (items, total) = store
        .list(tenant, Some(EscalationStatus::Pending), PageParams::new(Some(2), Some(1)))
        .await?;
    assert_eq!(total, 2);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, ids[0]);
    Ok(())
}
