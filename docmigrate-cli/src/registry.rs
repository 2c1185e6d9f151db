//! Change units of this deployment, in identifier order

use docmigrate::prelude::*;
use docmigrate::store::SortOrder;

pub const TENANTS: &str = "tenants";
pub const PLANS: &str = "plans";

pub fn build() -> Result<Registry> {
    Registry::builder()
        .define(
            "0001_create_tenants",
            "Create the tenants container",
            |ctx: SharedContext| async move {
                let definition = ContainerDefinition::new(TENANTS, "/tenantId")
                    .with_indexing_policy(IndexingPolicy::default().exclude("/settings/*"));
                ctx.create_container(&definition).await?;
                Ok(())
            },
        )
        .define(
            "0002_create_plans",
            "Create the plans container",
            |ctx: SharedContext| async move {
                ctx.create_container(&ContainerDefinition::new(PLANS, "/kind"))
                    .await?;
                Ok(())
            },
        )
        .define("0003_seed_plans", "Seed the default plans", |ctx: SharedContext| async move {
            let outcome = ctx.seed_data(&SeedSpec::new(PLANS, "kind", default_plans())).await?;
            ctx.log(&format!(
                "plans: {} inserted, {} already present",
                outcome.inserted, outcome.skipped
            ));
            Ok(())
        })
        .define(
            "0004_index_tenants_by_name",
            "Composite index on tenant name and creation time",
            |ctx: SharedContext| async move {
                let policy = IndexingPolicy::default()
                    .exclude("/settings/*")
                    .include("/name/?")
                    .composite([
                        ("/name", SortOrder::Ascending),
                        ("/createdAt", SortOrder::Descending),
                    ]);
                ctx.update_indexing_policy(TENANTS, &policy).await
            },
        )
        .define(
            "0005_backfill_tenant_tier",
            "Default tenants without a tier to the free plan",
            |ctx: SharedContext| async move { backfill_tenant_tier(ctx).await },
        )
        .build()
}

fn default_plans() -> Vec<Value> {
    vec![
        json!({"id": "free", "kind": "plan", "name": "Free", "seats": 3, "priceCents": 0}),
        json!({"id": "team", "kind": "plan", "name": "Team", "seats": 25, "priceCents": 4900}),
        json!({"id": "enterprise", "kind": "plan", "name": "Enterprise", "seats": null, "priceCents": null}),
    ]
}

async fn backfill_tenant_tier(ctx: SharedContext) -> Result<()> {
    let query = Query::new("SELECT * FROM c WHERE NOT IS_DEFINED(c.tier)");
    let tenants = match ctx.run_query(TENANTS, &query).await {
        Ok(rows) => rows,
        // A dry run never created the container
        Err(e) if e.is_not_found() && ctx.is_dry_run() => {
            ctx.log("tenants container does not exist yet; nothing to backfill");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for tenant in &tenants {
        let Some(id) = tenant.get("id").and_then(Value::as_str) else {
            ctx.log(&format!("Skipping tenant without id: {}", tenant));
            continue;
        };
        let partition_key = PartitionKey::from_value(&tenant["tenantId"])
            .context(format!("tenant {} has an invalid tenantId", id))?;
        ctx.patch_item(
            TENANTS,
            id,
            &partition_key,
            &[PatchOperation::set("/tier", "free")],
        )
        .await?;
    }

    ctx.log(&format!("Backfilled tier on {} tenant(s)", tenants.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmigrate::migrations::{RecordedCall, RecordingContext};
    use std::sync::Arc;

    #[test]
    fn test_registry_is_ordered() {
        let registry = build().unwrap();
        let ids = registry.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_seed_plans_unit() {
        let registry = build().unwrap();
        let ctx = Arc::new(RecordingContext::new("dev"));
        registry
            .get("0003_seed_plans")
            .unwrap()
            .apply(ctx.clone())
            .await
            .unwrap();

        match &ctx.operations()[..] {
            [RecordedCall::SeedData(spec)] => {
                assert_eq!(spec.container, PLANS);
                assert_eq!(spec.records.len(), 3);
                assert!(!spec.upsert);
            }
            other => panic!("unexpected calls: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backfill_patches_each_tenant() {
        let registry = build().unwrap();
        let ctx = Arc::new(RecordingContext::new("dev").with_query_result(
            TENANTS,
            vec![
                json!({"id": "acme", "tenantId": "acme"}),
                json!({"id": "globex", "tenantId": "globex"}),
            ],
        ));
        registry
            .get("0005_backfill_tenant_tier")
            .unwrap()
            .apply(ctx.clone())
            .await
            .unwrap();

        let patched: Vec<String> = ctx
            .operations()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::PatchItem { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(patched, vec!["acme", "globex"]);
    }

    #[tokio::test]
    async fn test_index_unit_targets_tenants() {
        let registry = build().unwrap();
        let ctx = Arc::new(RecordingContext::new("dev"));
        registry
            .get("0004_index_tenants_by_name")
            .unwrap()
            .apply(ctx.clone())
            .await
            .unwrap();

        match &ctx.operations()[..] {
            [RecordedCall::UpdateIndexingPolicy { container, policy }] => {
                assert_eq!(container, TENANTS);
                assert_eq!(policy.composite_indexes.len(), 1);
            }
            other => panic!("unexpected calls: {:?}", other),
        }
    }
}
