//! End-to-end tests against the in-memory cloud
//!
//! Applies the full blueprint, publishes objects the way the deploy stage would and
//! fetches them anonymously through the website endpoint.

use siteplan::{
    Exports, IdentityState, MemoryCloud, Outcome, Plan, PlanConfig, PublicReadMechanism,
    Reconciler, SiteConfig, State, StaticSitePipeline,
};

const BUCKET: &str = "docs.example.com";

fn config() -> PlanConfig {
    PlanConfig::new("us-east-1", "123456789012").with_tag("team", "web")
}

fn blueprint(mechanism: PublicReadMechanism) -> StaticSitePipeline {
    StaticSitePipeline::new(
        config(),
        SiteConfig::new("docs", BUCKET).with_public_read(mechanism),
    )
    .unwrap()
}

fn publish(cloud: &mut MemoryCloud) {
    cloud.put_object(BUCKET, "index.html", "<h1>Docs</h1>").unwrap();
    cloud.put_object(BUCKET, "error.html", "<h1>Not here</h1>").unwrap();
    cloud.put_object(BUCKET, "guide/index.html", "<h1>Guide</h1>").unwrap();
}

#[test]
fn test_index_served_through_bucket_policy() -> anyhow::Result<()> {
    let plan = blueprint(PublicReadMechanism::BucketPolicy).plan()?;
    let mut cloud = MemoryCloud::new(config());
    let mut state = State::new();

    let report = Reconciler::new(&mut cloud).apply(&plan, &mut state);
    assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.changes(), 8);
    assert!(report
        .identities()
        .values()
        .all(|s| *s == IdentityState::Active));

    publish(&mut cloud);
    let outputs = Exports::resolve(plan.outputs(), |r| state.attribute(r))?;
    let endpoint = outputs.get("website_endpoint").unwrap();
    assert_eq!(endpoint, "http://docs.example.com.s3-website-us-east-1.amazonaws.com");

    let home = cloud.website_get(endpoint);
    assert!(home.is_ok());
    assert_eq!(home.text(), "<h1>Docs</h1>");

    let guide = cloud.website_get(&format!("{}/guide/", endpoint));
    assert_eq!(guide.text(), "<h1>Guide</h1>");

    let missing = cloud.website_get(&format!("{}/missing.html", endpoint));
    assert_eq!(missing.status, 404);
    assert_eq!(missing.text(), "<h1>Not here</h1>");
    Ok(())
}

#[test]
fn test_index_served_through_acl() -> anyhow::Result<()> {
    let plan = blueprint(PublicReadMechanism::Acl).plan()?;
    let mut cloud = MemoryCloud::new(config());
    let mut state = State::new();

    let report = Reconciler::new(&mut cloud).apply(&plan, &mut state);
    assert!(report.is_success());
    assert!(cloud.bucket_policy(BUCKET).is_none());

    publish(&mut cloud);
    let response = cloud.website_get("http://docs.example.com.s3-website-us-east-1.amazonaws.com/");
    assert_eq!(response.status, 200);
    Ok(())
}

#[test]
fn test_removing_public_read_only_touches_the_grant() -> anyhow::Result<()> {
    let blueprint = blueprint(PublicReadMechanism::BucketPolicy);
    let plan = blueprint.plan()?;
    let mut cloud = MemoryCloud::new(config());
    let mut state = State::new();
    Reconciler::new(&mut cloud).apply(&plan, &mut state);
    publish(&mut cloud);

    let endpoint = "http://docs.example.com.s3-website-us-east-1.amazonaws.com/index.html";
    assert_eq!(cloud.website_get(endpoint).status, 200);

    // Same declarations without the grant
    let without_grant: Vec<_> = blueprint
        .resources()?
        .into_iter()
        .filter(|r| r.name().as_str() != "site_public_read")
        .collect();
    let private = Plan::build(config(), without_grant, blueprint.outputs()?)?;

    let calls_before = cloud.calls();
    let report = Reconciler::new(&mut cloud).apply(&private, &mut state);
    assert!(report.is_success());
    assert_eq!(report.changes(), 1);
    assert_eq!(report.outcome("site_public_read"), Some(&Outcome::Destroyed));
    assert_eq!(report.outcome("site"), Some(&Outcome::Unchanged));

    let calls_after = cloud.calls();
    assert_eq!(calls_after.destroy, calls_before.destroy + 1);
    assert_eq!(calls_after.create, calls_before.create);
    assert_eq!(calls_after.update, calls_before.update);

    assert_eq!(cloud.website_get(endpoint).status, 403);
    assert!(!state.contains(&siteplan::LogicalName::new("site_public_read")?));
    Ok(())
}

#[test]
fn test_switching_mechanism_updates_bucket() -> anyhow::Result<()> {
    let mut cloud = MemoryCloud::new(config());
    let mut state = State::new();
    Reconciler::new(&mut cloud).apply(&blueprint(PublicReadMechanism::BucketPolicy).plan()?, &mut state);
    publish(&mut cloud);

    let report = Reconciler::new(&mut cloud).apply(&blueprint(PublicReadMechanism::Acl).plan()?, &mut state);
    assert!(report.is_success());
    assert_eq!(report.outcome("site_public_read"), Some(&Outcome::Destroyed));
    assert_eq!(report.outcome("site"), Some(&Outcome::Updated));

    // Objects survive the in-place update and stay public through the ACL
    let response = cloud.website_get("http://docs.example.com.s3-website-us-east-1.amazonaws.com/");
    assert_eq!(response.text(), "<h1>Docs</h1>");
    Ok(())
}
