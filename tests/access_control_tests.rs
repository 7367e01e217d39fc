//! Access-control compilation against a temporary HBA file.

use anyhow::Result;
use provisioner::access_control::hba_file::{BEGIN_MARKER, END_MARKER, managed_text};
use provisioner::access_control::{HbaRule, parse_rules};
use provisioner::error::ProvisionError;
use provisioner::provisioning::CreateTenant;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{TestContext, hba_template};

async fn tenant(ctx: &TestContext, name: &str) -> Result<provisioner::models::tenant::Model> {
    let created = ctx
        .provisioner
        .create_tenant(CreateTenant {
            friendly_name: name.to_string(),
            owner_email: "ops@example.com".to_string(),
            max_connections: None,
        })
        .await?;
    Ok(created.tenant)
}

fn managed_rules(ctx: &TestContext) -> Vec<HbaRule> {
    let contents = ctx.hba_contents();
    parse_rules(managed_text(&contents).unwrap()).unwrap()
}

#[tokio::test]
async fn add_ip_emits_one_allow_line_and_one_deny_pair() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;

    for address in ["10.0.0.1", "192.168.4.0/22", "0.0.0.0/0", "203.0.113.9/32"] {
        let entry = ctx.provisioner.add_ip(t.id, address, None).await?;

        let rules = managed_rules(&ctx);
        let allow: Vec<_> = rules
            .iter()
            .filter(|r| r.is_allow() && r.address == entry.address)
            .collect();
        assert_eq!(allow.len(), 1, "{address}");
        assert_eq!(allow[0].database, t.database_name);
        assert_eq!(allow[0].role, t.role_name);
        assert_eq!(allow[0].method, "scram-sha-256");

        let denies: Vec<_> = rules.iter().filter(|r| !r.is_allow()).collect();
        assert_eq!(denies.len(), 2);
        assert_eq!(rules.last().unwrap().address, "::/0");
    }
    Ok(())
}

#[tokio::test]
async fn recompile_is_idempotent() -> Result<()> {
    let ctx = TestContext::new().await?;
    let a = tenant(&ctx, "A").await?;
    let b = tenant(&ctx, "B").await?;
    ctx.provisioner.add_ip(a.id, "10.0.0.1", None).await?;
    ctx.provisioner.add_ip(b.id, "10.0.0.2", Some("ci".into())).await?;

    let first = ctx.hba_contents();
    let report = ctx.provisioner.recompile().await?;
    let second = ctx.hba_contents();

    assert_eq!(first, second);
    assert!(!report.changed);
    assert_eq!(report.tenants, 2);
    assert_eq!(report.rules, 6);
    Ok(())
}

#[tokio::test]
async fn unmanaged_content_is_preserved() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    let entry = ctx.provisioner.add_ip(t.id, "10.1.2.3", None).await?;

    let contents = ctx.hba_contents();
    let template = hba_template();
    let (head, _) = template.split_once(BEGIN_MARKER).unwrap();
    let (_, tail) = template.split_once(END_MARKER).unwrap();
    assert!(contents.starts_with(head));
    assert!(contents.ends_with(tail));

    ctx.provisioner.remove_ip(t.id, entry.id).await?;
    assert_eq!(ctx.hba_contents(), template);
    Ok(())
}

#[tokio::test]
async fn tenants_without_entries_emit_no_rules() -> Result<()> {
    let ctx = TestContext::new().await?;
    tenant(&ctx, "empty").await?;

    let report = ctx.provisioner.recompile().await?;

    assert_eq!(report.rules, 0);
    assert_eq!(ctx.hba_contents(), hba_template());
    assert_eq!(ctx.engine.reloads(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_address_conflicts() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;

    ctx.provisioner.add_ip(t.id, "10.0.0.1/32", None).await?;
    let err = ctx
        .provisioner
        .add_ip(t.id, "10.0.0.1/32", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Conflict(_)));

    // A bare address is the same /32
    let err = ctx.provisioner.add_ip(t.id, "10.0.0.1", None).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Conflict(_)));

    assert_eq!(ctx.provisioner.list_whitelist(t.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_address_is_rejected_before_io() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    let before = ctx.hba_contents();
    let reloads = ctx.engine.reloads();

    let err = ctx
        .provisioner
        .add_ip(t.id, "10.0.0.300", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(ctx.provisioner.list_whitelist(t.id).await?.is_empty());
    assert_eq!(ctx.hba_contents(), before);
    assert_eq!(ctx.engine.reloads(), reloads);
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_and_entry_are_not_found() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;

    let err = ctx
        .provisioner
        .add_ip(Uuid::new_v4(), "10.0.0.1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::NotFound { .. }));

    let err = ctx
        .provisioner
        .remove_ip(t.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn whitelist_lists_newest_first() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    let first = ctx.provisioner.add_ip(t.id, "10.0.0.1", None).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = ctx.provisioner.add_ip(t.id, "10.0.0.2", None).await?;

    let ids: Vec<Uuid> = ctx
        .provisioner
        .list_whitelist(t.id)
        .await?
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![second.id, first.id]);
    Ok(())
}

#[tokio::test]
async fn missing_marker_is_corruption_and_file_is_untouched() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    let corrupted = hba_template().replace(END_MARKER, "");
    std::fs::write(&ctx.hba_path, &corrupted)?;

    let err = ctx.provisioner.recompile().await.unwrap_err();
    assert!(matches!(err, ProvisionError::ConfigCorrupted { .. }));
    assert_eq!(ctx.hba_contents(), corrupted);
    assert_eq!(ctx.engine.reloads(), 0);

    // The whitelist change still commits; enforcement is reported stale
    let err = ctx.provisioner.add_ip(t.id, "10.0.0.1", None).await.unwrap_err();
    match err {
        ProvisionError::EnforcementStale {
            entry: Some(entry),
            source,
        } => {
            assert_eq!(entry.address, "10.0.0.1/32");
            assert!(matches!(*source, ProvisionError::ConfigCorrupted { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ctx.provisioner.list_whitelist(t.id).await?.len(), 1);
    assert_eq!(ctx.hba_contents(), corrupted);
    Ok(())
}

#[tokio::test]
async fn reload_failure_is_distinct_from_write_failure() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    ctx.engine.fail_on("reload_config");

    let err = ctx.provisioner.add_ip(t.id, "10.0.0.1", None).await.unwrap_err();

    match err {
        ProvisionError::EnforcementStale { source, .. } => {
            assert!(matches!(*source, ProvisionError::ReloadFailed { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // File on disk is already correct
    assert!(ctx.hba_contents().contains("10.0.0.1/32"));

    ctx.engine.clear_failures();
    let report = ctx.provisioner.recompile().await?;
    assert!(!report.changed);
    Ok(())
}

#[tokio::test]
async fn concurrent_recompiles_do_not_lose_updates() -> Result<()> {
    let ctx = TestContext::new().await?;
    let t = tenant(&ctx, "T1").await?;
    for i in 1..=5 {
        ctx.provisioner
            .add_ip(t.id, &format!("10.0.0.{i}"), None)
            .await?;
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provisioner = ctx.provisioner.clone();
            tokio::spawn(async move { provisioner.recompile().await })
        })
        .collect();
    for handle in handles {
        handle.await??;
    }

    let rules = managed_rules(&ctx);
    assert_eq!(rules.iter().filter(|r| r.is_allow()).count(), 5);
    Ok(())
}
