//! In-memory provisioner
//!
//! [`MemoryCloud`] stands in for the real provisioning engine. It keeps buckets,
//! objects, roles, build projects and pipelines in maps, enforces the same name
//! and reference constraints the services do, and answers anonymous website
//! requests the way a static-website endpoint would.
//!
//! Failures can be injected per logical name with [`MemoryCloud::fail_next`], and a
//! bucket quota can be set to exercise partial-failure handling.

use crate::core::config::PlanConfig;
use crate::core::iam::{Action, Effect, PolicyDocument, PolicyEngine, Principal};
use crate::core::reconcile::{Attributes, MaterializedResource, Provisioner};
use crate::core::resource::{
    BuildProject, DeliveryPipeline, Identity, RenderedResource, ResourceBody, StorageBucket,
};
use crate::core::template::Template;
use crate::core::validation::LogicalName;
use crate::error::ProvisionError;
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Bucket {
    spec: StorageBucket,
    policy: Option<PolicyDocument>,
    objects: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone)]
struct Role {
    identity: Identity,
    attached: BTreeMap<String, PolicyDocument>,
}

/// Provisioner API calls made so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub update: usize,
    pub destroy: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.create + self.update + self.destroy
    }
}

/// Response of an anonymous website request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl WebsiteResponse {
    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        WebsiteResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Simulated cloud account
pub struct MemoryCloud {
    config: PlanConfig,
    buckets: BTreeMap<String, Bucket>,
    roles: BTreeMap<String, Role>,
    projects: BTreeMap<String, BuildProject>,
    pipelines: BTreeMap<String, DeliveryPipeline>,
    bucket_quota: Option<usize>,
    failures: BTreeMap<LogicalName, ProvisionError>,
    engine: PolicyEngine,
    calls: CallCounts,
}

impl MemoryCloud {
    pub fn new(config: PlanConfig) -> Self {
        MemoryCloud {
            config,
            buckets: BTreeMap::new(),
            roles: BTreeMap::new(),
            projects: BTreeMap::new(),
            pipelines: BTreeMap::new(),
            bucket_quota: None,
            failures: BTreeMap::new(),
            engine: PolicyEngine::new_default(),
            calls: CallCounts::default(),
        }
    }

    /// Limit the number of buckets this account may own
    pub fn with_bucket_quota(mut self, quota: usize) -> Self {
        self.bucket_quota = Some(quota);
        self
    }

    /// Fail the next call made for `resource` with `error`
    pub fn fail_next(&mut self, resource: &LogicalName, error: ProvisionError) {
        self.failures.insert(resource.clone(), error);
    }

    pub fn calls(&self) -> CallCounts {
        self.calls
    }

    /// Number of live resources of every kind
    pub fn resource_count(&self) -> usize {
        let policies = self.buckets.values().filter(|b| b.policy.is_some()).count();
        let attachments: usize = self.roles.values().map(|r| r.attached.len()).sum();
        self.buckets.len()
            + policies
            + self.roles.len()
            + attachments
            + self.projects.len()
            + self.pipelines.len()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    pub fn bucket_policy(&self, bucket: &str) -> Option<&PolicyDocument> {
        self.buckets.get(bucket)?.policy.as_ref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Upload an object, as the deploy stage would
    pub fn put_object(
        &mut self,
        bucket: &str,
        key: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ProvisionError> {
        let target = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProvisionError::NotFound(format!("bucket {}", bucket)))?;
        target.objects.insert(key.into(), body.into());
        Ok(())
    }

    pub fn delete_object(&mut self, bucket: &str, key: &str) -> Result<(), ProvisionError> {
        self.buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.remove(key))
            .map(|_| ())
            .ok_or_else(|| ProvisionError::NotFound(format!("{}/{}", bucket, key)))
    }

    /// Would `role` be allowed `action` on `resource` by its attached policies?
    pub fn identity_allows(&mut self, role: &str, action: &str, resource: &str) -> bool {
        let (Some(role), Ok(action)) = (self.roles.get(role), Action::parse(action)) else {
            return false;
        };
        let documents: Vec<&PolicyDocument> = role
            .identity
            .inline_policy
            .iter()
            .map(|p| &p.document)
            .chain(role.attached.values())
            .collect();
        let mut allowed = false;
        for document in documents {
            if explicitly_denies(document, &action, resource) {
                return false;
            }
            allowed |= self.engine.evaluate(document, &action, resource, None);
        }
        allowed
    }

    /// Anonymous GET against a website endpoint, e.g. `http://{host}/docs/`
    pub fn website_get(&mut self, url: &str) -> WebsiteResponse {
        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .unwrap_or(url);
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let Some(name) = self
            .buckets
            .iter()
            .find(|(name, b)| b.spec.website.is_some() && self.config.website_endpoint(name) == host)
            .map(|(name, _)| name.clone())
        else {
            return WebsiteResponse::new(404, "NoSuchWebsiteConfiguration");
        };

        let Some(bucket) = self.buckets.get(&name) else {
            return WebsiteResponse::new(404, "NoSuchBucket");
        };
        let Some(website) = bucket.spec.website.clone() else {
            return WebsiteResponse::new(404, "NoSuchWebsiteConfiguration");
        };
        let mut key = path.to_string();
        if key.is_empty() || key.ends_with('/') {
            key.push_str(&website.index_document);
        }

        if !self.anonymous_read(&name, &key) {
            trace!(bucket = %name, %key, "Anonymous read denied");
            return WebsiteResponse::new(403, "AccessDenied");
        }
        if let Some(body) = self.object(&name, &key) {
            return WebsiteResponse::new(200, body);
        }
        let error_page = website
            .error_document
            .filter(|doc| self.anonymous_read(&name, doc))
            .and_then(|doc| self.object(&name, &doc));
        WebsiteResponse::new(404, error_page.unwrap_or_else(|| b"NoSuchKey".to_vec()))
    }

    fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.get(bucket)?.objects.get(key).cloned()
    }

    fn anonymous_read(&mut self, bucket: &str, key: &str) -> bool {
        let Some(target) = self.buckets.get(bucket) else {
            return false;
        };
        if target.spec.is_public_read() {
            return true;
        }
        let (Some(policy), Ok(get_object)) = (target.policy.clone(), Action::parse("s3:GetObject"))
        else {
            return false;
        };
        let address = format!("{}/{}", self.config.bucket_arn(bucket), key);
        self.engine
            .evaluate(&policy, &get_object, &address, Some(&Principal::Anyone))
    }

    fn take_failure(&mut self, name: &LogicalName) -> Result<(), ProvisionError> {
        match self.failures.remove(name) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn role_by_arn(&self, arn: &str) -> Option<&Role> {
        self.roles
            .values()
            .find(|r| self.config.role_arn(&r.identity.role_name) == arn)
    }

    /// Identifier the service assigns to `body`
    fn identifier(body: &ResourceBody) -> Result<String, ProvisionError> {
        Ok(match body {
            ResourceBody::Bucket(b) => b.bucket.to_string(),
            ResourceBody::BucketPolicy(p) => literal(&p.bucket)?,
            ResourceBody::Identity(i) => i.role_name.clone(),
            ResourceBody::PolicyAttachment(a) => format!("{}/{}", literal(&a.role)?, a.policy_name),
            ResourceBody::BuildProject(p) => p.project_name.clone(),
            ResourceBody::DeliveryPipeline(p) => p.pipeline_name.clone(),
        })
    }

    fn insert(&mut self, body: ResourceBody, replace: bool) -> Result<Attributes, ProvisionError> {
        let id = Self::identifier(&body)?;
        let exists = || ProvisionError::AlreadyExists(id.clone());

        match body {
            ResourceBody::Bucket(spec) => {
                let (policy, objects) = match self.buckets.remove(&id) {
                    Some(previous) if replace => (previous.policy, previous.objects),
                    Some(previous) => {
                        self.buckets.insert(id.clone(), previous);
                        return Err(exists());
                    }
                    None => {
                        if let Some(quota) = self.bucket_quota {
                            if self.buckets.len() >= quota {
                                return Err(ProvisionError::QuotaExceeded(format!(
                                    "bucket limit of {} reached",
                                    quota
                                )));
                            }
                        }
                        (None, BTreeMap::new())
                    }
                };
                let website = spec.website.is_some();
                self.buckets.insert(
                    id.clone(),
                    Bucket {
                        spec,
                        policy,
                        objects,
                    },
                );
                let mut attrs = attributes(&id, &self.config.bucket_arn(&id));
                attrs.insert("bucket_domain_name".into(), format!("{}.s3.amazonaws.com", id));
                if website {
                    attrs.insert("website_endpoint".into(), self.config.website_endpoint(&id));
                }
                Ok(attrs)
            }
            ResourceBody::BucketPolicy(policy) => {
                let bucket = self
                    .buckets
                    .get_mut(&id)
                    .ok_or_else(|| ProvisionError::NotFound(format!("bucket {}", id)))?;
                if bucket.policy.is_some() && !replace {
                    return Err(exists());
                }
                bucket.policy = Some(policy.policy);
                Ok(Attributes::from([("id".to_string(), id)]))
            }
            ResourceBody::Identity(identity) => {
                let attached = match self.roles.remove(&id) {
                    Some(previous) if replace => previous.attached,
                    Some(previous) => {
                        self.roles.insert(id.clone(), previous);
                        return Err(exists());
                    }
                    None => BTreeMap::new(),
                };
                self.roles.insert(id.clone(), Role { identity, attached });
                let mut attrs = attributes(&id, &self.config.role_arn(&id));
                attrs.insert("name".into(), id);
                Ok(attrs)
            }
            ResourceBody::PolicyAttachment(attachment) => {
                let role_name = literal(&attachment.role)?;
                let role = self
                    .roles
                    .get_mut(&role_name)
                    .ok_or_else(|| ProvisionError::NotFound(format!("role {}", role_name)))?;
                if role.attached.contains_key(&attachment.policy_name) && !replace {
                    return Err(exists());
                }
                role.attached.insert(attachment.policy_name, attachment.policy);
                Ok(Attributes::from([("id".to_string(), id)]))
            }
            ResourceBody::BuildProject(project) => {
                let role = literal(&project.service_role)?;
                if self.role_by_arn(&role).is_none() {
                    return Err(ProvisionError::NotFound(format!("service role {}", role)));
                }
                if self.projects.contains_key(&id) && !replace {
                    return Err(exists());
                }
                self.projects.insert(id.clone(), project);
                let mut attrs = attributes(&id, &self.config.build_project_arn(&id));
                attrs.insert("name".into(), id);
                Ok(attrs)
            }
            ResourceBody::DeliveryPipeline(pipeline) => {
                let role = literal(&pipeline.role_arn)?;
                if self.role_by_arn(&role).is_none() {
                    return Err(ProvisionError::NotFound(format!("pipeline role {}", role)));
                }
                for action in pipeline.stages.iter().flat_map(|s| &s.actions) {
                    if let Some(project) = action.configuration.get("ProjectName") {
                        let project = literal(project)?;
                        if !self.projects.contains_key(&project) {
                            return Err(ProvisionError::NotFound(format!("build project {}", project)));
                        }
                    }
                    if let Some(bucket) = action.configuration.get("BucketName") {
                        let bucket = literal(bucket)?;
                        if !self.buckets.contains_key(&bucket) {
                            return Err(ProvisionError::NotFound(format!("bucket {}", bucket)));
                        }
                    }
                }
                if self.pipelines.contains_key(&id) && !replace {
                    return Err(exists());
                }
                self.pipelines.insert(id.clone(), pipeline);
                Ok(attributes(&id, &self.config.pipeline_arn(&id)))
            }
        }
    }

    /// Would `remove` succeed?
    ///
    /// A role being replaced takes its attachments with it; outright deletion
    /// requires them to be detached first.
    fn check_remove(&self, body: &ResourceBody, replacing: bool) -> Result<(), ProvisionError> {
        let id = Self::identifier(body)?;
        let missing = || ProvisionError::NotFound(id.clone());

        match body {
            ResourceBody::Bucket(spec) => {
                let bucket = self.buckets.get(&id).ok_or_else(missing)?;
                if !bucket.objects.is_empty() && !spec.force_destroy {
                    return Err(ProvisionError::Api(format!(
                        "BucketNotEmpty: {} holds {} objects",
                        id,
                        bucket.objects.len()
                    )));
                }
            }
            ResourceBody::BucketPolicy(_) => {
                self.buckets
                    .get(&id)
                    .and_then(|b| b.policy.as_ref())
                    .ok_or_else(missing)?;
            }
            ResourceBody::Identity(_) => {
                let role = self.roles.get(&id).ok_or_else(missing)?;
                if !role.attached.is_empty() && !replacing {
                    return Err(ProvisionError::Api(format!(
                        "DeleteConflict: role {} still has attached policies",
                        id
                    )));
                }
            }
            ResourceBody::PolicyAttachment(attachment) => {
                let role_name = literal(&attachment.role)?;
                self.roles
                    .get(&role_name)
                    .filter(|r| r.attached.contains_key(&attachment.policy_name))
                    .ok_or_else(missing)?;
            }
            ResourceBody::BuildProject(_) => {
                self.projects.get(&id).ok_or_else(missing)?;
            }
            ResourceBody::DeliveryPipeline(_) => {
                self.pipelines.get(&id).ok_or_else(missing)?;
            }
        }
        Ok(())
    }

    fn remove(&mut self, body: &ResourceBody, replacing: bool) -> Result<(), ProvisionError> {
        self.check_remove(body, replacing)?;
        let id = Self::identifier(body)?;

        match body {
            ResourceBody::Bucket(_) => {
                self.buckets.remove(&id);
            }
            ResourceBody::BucketPolicy(_) => {
                if let Some(bucket) = self.buckets.get_mut(&id) {
                    bucket.policy = None;
                }
            }
            ResourceBody::Identity(_) => {
                self.roles.remove(&id);
            }
            ResourceBody::PolicyAttachment(attachment) => {
                let role_name = literal(&attachment.role)?;
                if let Some(role) = self.roles.get_mut(&role_name) {
                    role.attached.remove(&attachment.policy_name);
                }
            }
            ResourceBody::BuildProject(_) => {
                self.projects.remove(&id);
            }
            ResourceBody::DeliveryPipeline(_) => {
                self.pipelines.remove(&id);
            }
        }
        Ok(())
    }
}

impl Provisioner for MemoryCloud {
    fn create(&mut self, resource: &RenderedResource) -> Result<Attributes, ProvisionError> {
        self.calls.create += 1;
        self.take_failure(&resource.name)?;
        let body = resource.body().map_err(api)?;
        debug!(resource = %resource.name, kind = %resource.kind, "create");
        self.insert(body, false)
    }

    fn update(
        &mut self,
        resource: &RenderedResource,
        current: &MaterializedResource,
    ) -> Result<Attributes, ProvisionError> {
        self.calls.update += 1;
        self.take_failure(&resource.name)?;
        let body = resource.body().map_err(api)?;
        let previous = current.body().map_err(api)?;
        debug!(resource = %resource.name, kind = %resource.kind, "update");

        if Self::identifier(&body)? == Self::identifier(&previous)? {
            return self.insert(body, true);
        }
        // Renamed: replace the old one only if it can actually go. One that
        // vanished with its container (a policy on a renamed bucket) is just created.
        let old_present = match self.check_remove(&previous, true) {
            Ok(()) => true,
            Err(ProvisionError::NotFound(_)) => false,
            Err(error) => return Err(error),
        };
        let attrs = self.insert(body, false)?;
        if old_present {
            self.remove(&previous, true)?;
        }
        Ok(attrs)
    }

    fn destroy(&mut self, resource: &MaterializedResource) -> Result<(), ProvisionError> {
        self.calls.destroy += 1;
        self.take_failure(&resource.name)?;
        let body = resource.body().map_err(api)?;
        debug!(resource = %resource.name, kind = %resource.kind, "destroy");
        self.remove(&body, false)
    }
}

fn api(error: crate::error::PlanError) -> ProvisionError {
    ProvisionError::Api(error.to_string())
}

fn literal(template: &Template) -> Result<String, ProvisionError> {
    template
        .as_literal()
        .ok_or_else(|| ProvisionError::Api(format!("unrendered value '{}'", template)))
}

fn attributes(id: &str, arn: &str) -> Attributes {
    Attributes::from([
        ("id".to_string(), id.to_string()),
        ("arn".to_string(), arn.to_string()),
    ])
}

fn explicitly_denies(document: &PolicyDocument, action: &Action, resource: &str) -> bool {
    document
        .permission_statements()
        .any(|s| s.effect == Effect::Deny && s.applies_to(action, resource, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::{PermissionStatement, Statement};
    use crate::core::plan::Plan;
    use crate::core::reconcile::{ApplyReport, Outcome, Reconciler, State};
    use crate::core::template::Reference;
    use crate::core::resource::{BucketPolicy, PolicyAttachment, Resource, WebsiteConfig};
    use crate::core::validation::BucketName;
    use std::collections::BTreeSet;

    fn name(s: &str) -> LogicalName {
        LogicalName::new(s).unwrap()
    }

    fn config() -> PlanConfig {
        PlanConfig::new("us-east-1", "123456789012")
    }

    fn site(bucket: &str) -> Resource {
        let spec = StorageBucket::new(BucketName::new(bucket).unwrap())
            .with_website(WebsiteConfig::new("index.html").with_error_document("error.html"));
        Resource::new(name("site"), spec).unwrap()
    }

    fn public_read() -> Resource {
        let statement = PermissionStatement::new(
            Effect::Allow,
            [Action::parse("s3:GetObject").unwrap()],
            [Template::parse("${site.arn}/*").unwrap()],
        )
        .with_principal(Principal::Anyone);
        let policy = PolicyDocument::new().with_statement(Statement::permission(statement).unwrap());
        Resource::new(
            name("site_public_read"),
            BucketPolicy::new(Template::parse("${site.id}").unwrap(), policy),
        )
        .unwrap()
    }

    fn apply(cloud: &mut MemoryCloud, resources: Vec<Resource>, state: &mut State) -> ApplyReport {
        let plan = Plan::build(config(), resources, Vec::new()).unwrap();
        Reconciler::new(cloud).apply(&plan, state)
    }

    #[test]
    fn test_website_serves_public_objects() {
        let mut cloud = MemoryCloud::new(config());
        let mut state = State::new();
        let report = apply(&mut cloud, vec![site("docs-site"), public_read()], &mut state);
        assert!(report.is_success());

        cloud.put_object("docs-site", "index.html", "<h1>home</h1>").unwrap();
        cloud.put_object("docs-site", "error.html", "oops").unwrap();
        cloud.put_object("docs-site", "guide/index.html", "guide").unwrap();

        let endpoint = state
            .attribute(&Reference::new(&name("site"), "website_endpoint"))
            .unwrap();
        assert_eq!(endpoint, "docs-site.s3-website-us-east-1.amazonaws.com");

        let home = cloud.website_get(&format!("http://{}/", endpoint));
        assert_eq!(home.status, 200);
        assert_eq!(home.text(), "<h1>home</h1>");
        assert_eq!(cloud.website_get(&format!("http://{}/guide/", endpoint)).text(), "guide");

        let missing = cloud.website_get(&format!("http://{}/nope.html", endpoint));
        assert_eq!(missing.status, 404);
        assert_eq!(missing.text(), "oops");

        assert_eq!(cloud.website_get("http://unknown.example.com/").status, 404);
    }

    #[test]
    fn test_private_bucket_forbidden() {
        let mut cloud = MemoryCloud::new(config());
        let mut state = State::new();
        apply(&mut cloud, vec![site("docs-site")], &mut state);
        cloud.put_object("docs-site", "index.html", "home").unwrap();

        let response = cloud.website_get("http://docs-site.s3-website-us-east-1.amazonaws.com/");
        assert_eq!(response.status, 403);
    }

    #[test]
    fn test_already_exists_and_not_found() {
        let mut cloud = MemoryCloud::new(config());
        let mut state = State::new();
        apply(&mut cloud, vec![site("docs-site")], &mut state);

        // A second state file claiming the same bucket collides
        let mut other = State::new();
        let report = apply(&mut cloud, vec![site("docs-site")], &mut other);
        assert!(matches!(
            report.outcome("site"),
            Some(Outcome::Failed(ProvisionError::AlreadyExists(_)))
        ));

        assert!(matches!(
            cloud.put_object("missing", "a", "b"),
            Err(ProvisionError::NotFound(_))
        ));
    }

    #[test]
    fn test_bucket_quota() {
        let mut cloud = MemoryCloud::new(config()).with_bucket_quota(0);
        let mut state = State::new();
        let report = apply(&mut cloud, vec![site("docs-site"), public_read()], &mut state);

        assert!(matches!(
            report.outcome("site"),
            Some(Outcome::Failed(ProvisionError::QuotaExceeded(_)))
        ));
        assert_eq!(
            report.outcome("site_public_read"),
            Some(&Outcome::Skipped { blocked_by: name("site") })
        );
        assert!(state.is_empty());
        assert_eq!(cloud.resource_count(), 0);
    }

    #[test]
    fn test_non_empty_bucket_needs_force_destroy() {
        let mut cloud = MemoryCloud::new(config());
        let mut state = State::new();
        apply(&mut cloud, vec![site("docs-site")], &mut state);
        cloud.put_object("docs-site", "index.html", "home").unwrap();

        let report = Reconciler::new(&mut cloud).destroy_all(&mut state);
        assert!(matches!(
            report.outcome("site"),
            Some(Outcome::Failed(ProvisionError::Api(_)))
        ));
        assert!(state.contains(&name("site")));
        assert!(cloud.has_bucket("docs-site"));
    }

    #[test]
    fn test_identity_allows() {
        let mut cloud = MemoryCloud::new(config());
        let mut state = State::new();

        let role = Resource::new(
            name("build_role"),
            Identity::assumed_by("docs-build", "codebuild.amazonaws.com").unwrap(),
        )
        .unwrap();
        let statement = PermissionStatement::new(
            Effect::Allow,
            [Action::parse("s3:PutObject").unwrap()],
            [Template::parse("${site.arn}/*").unwrap()],
        );
        let attachment = Resource::new(
            name("build_policy"),
            PolicyAttachment::new(
                Template::parse("${build_role.name}").unwrap(),
                "docs-build-policy",
                PolicyDocument::new().with_statement(Statement::permission(statement).unwrap()),
            ),
        )
        .unwrap();

        let report = apply(&mut cloud, vec![site("docs-site"), role, attachment], &mut state);
        assert!(report.is_success());
        assert!(cloud.identity_allows("docs-build", "s3:PutObject", "arn:aws:s3:::docs-site/index.html"));
        assert!(!cloud.identity_allows("docs-build", "s3:DeleteObject", "arn:aws:s3:::docs-site/index.html"));
        assert!(!cloud.identity_allows("docs-build", "s3:PutObject", "arn:aws:s3:::other/index.html"));
        assert!(!cloud.identity_allows("nobody", "s3:PutObject", "arn:aws:s3:::docs-site/index.html"));
    }

    #[test]
    fn test_role_with_attachments_cannot_be_destroyed_first() {
        let mut cloud = MemoryCloud::new(config());
        let role = Identity::assumed_by("docs-build", "codebuild.amazonaws.com").unwrap();
        cloud.insert(ResourceBody::Identity(role.clone()), false).unwrap();
        cloud.roles.get_mut("docs-build").unwrap().attached.insert("p".to_string(), PolicyDocument::new());

        let err = cloud.remove(&ResourceBody::Identity(role), false).unwrap_err();
        assert!(matches!(err, ProvisionError::Api(msg) if msg.starts_with("DeleteConflict")));
    }

    #[test]
    fn test_fail_next_injects_once() {
        let mut cloud = MemoryCloud::new(config());
        cloud.fail_next(&name("site"), ProvisionError::Api("throttled".to_string()));

        let mut state = State::new();
        let first = apply(&mut cloud, vec![site("docs-site")], &mut state);
        assert!(!first.is_success());

        let second = apply(&mut cloud, vec![site("docs-site")], &mut state);
        assert_eq!(second.outcome("site"), Some(&Outcome::Created));
        assert_eq!(cloud.calls().create, 2);
        let names: BTreeSet<_> = state.names().map(ToString::to_string).collect();
        assert_eq!(names, BTreeSet::from(["site".to_string()]));
    }
}
