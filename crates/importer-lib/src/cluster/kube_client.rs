//! [`ClusterClient`] backed by the Kubernetes API via kube-rs

use super::{
    object_ref, poll_until, ClusterClient, Deletion, ObjectPredicate, PollOptions, ResourceKind,
    WaitError,
};
use crate::error::ClusterError;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Server-side applies objects under a fixed field manager
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, field_manager))
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let (namespace, name) = object_ref(obj)?;
        debug!(kind = %kind, namespace = %namespace, name = %name, "Server-side apply");
        let params = PatchParams::apply(&self.field_manager).force();
        let applied = self
            .api(kind, Some(namespace))
            .patch(name, &params, &Patch::Apply(obj))
            .await?;
        Ok(applied)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let (namespace, name) = object_ref(obj)?;
        debug!(kind = %kind, namespace = %namespace, name = %name, "Creating object");
        let created = self
            .api(kind, Some(namespace))
            .create(&PostParams::default(), obj)
            .await?;
        Ok(created)
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.api(kind, Some(namespace)).get_opt(name).await?)
    }

    async fn annotate(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        };
        let patch = json!({ "metadata": { "annotations": annotations } });
        match self
            .api(kind, Some(namespace))
            .patch(name, &params, &Patch::Merge(&patch))
            .await
        {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Deletion, ClusterError> {
        match self
            .api(kind, Some(namespace))
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(Deletion::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(Deletion::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api(kind, namespace).list(&params).await?.items)
    }

    async fn ping(&self) -> Result<(), ClusterError> {
        self.client.apiserver_version().await?;
        Ok(())
    }

    /// Watches the object; falls back to polling when the watch fails
    async fn watch_or_poll(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        predicate: ObjectPredicate<'_>,
        opts: &PollOptions,
    ) -> Result<Option<DynamicObject>, WaitError> {
        let started = Instant::now();
        let api = self.api(kind, Some(namespace));
        let watch = kube::runtime::wait::await_condition(api, name, predicate);

        let outcome = tokio::select! {
            _ = opts.cancel.cancelled() => {
                return Err(WaitError::TimedOut { elapsed: started.elapsed(), cancelled: true });
            }
            res = tokio::time::timeout(opts.timeout, watch) => res,
        };

        match outcome {
            Ok(Ok(obj)) => Ok(obj),
            Ok(Err(e)) => {
                warn!(
                    kind = %kind,
                    namespace = %namespace,
                    name = %name,
                    error = %e,
                    "Watch failed, falling back to polling"
                );
                let remaining = opts.timeout.saturating_sub(started.elapsed());
                let fallback = PollOptions {
                    timeout: remaining,
                    ..opts.clone()
                };
                poll_until(self, kind, namespace, name, predicate, &fallback).await
            }
            Err(_) => Err(WaitError::TimedOut {
                elapsed: started.elapsed(),
                cancelled: false,
            }),
        }
    }
}
