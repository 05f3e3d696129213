//! HTTP gateway provider
//!
//! Speaks JSON to a gateway that fronts the real orchestration provider.
//! A 404 on a describe means "no such service"; any other non-success status
//! is a provider rejection carrying the response body as detail.

use crate::client::{InfrastructureClient, Operation, ServiceRequest};
use crate::error::{InfrastructureError, Result};
use async_trait::async_trait;
use deployfish_types::{
    CapacityGroupState, ConfigParameter, InvocationHandle, LiveServiceState, ScalingPolicy,
    TaskDefinition, TaskDefinitionRevision, TaskInstance,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Provider reached over HTTP
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ScaleRequest {
    count: u32,
}

#[derive(Serialize)]
struct CapacityRequest {
    desired: u32,
    force: bool,
}

#[derive(Serialize)]
struct RunTaskRequest<'a> {
    task_definition_arn: &'a str,
    command: &'a [String],
}

#[derive(Serialize)]
struct ParametersRequest<'a> {
    prefix: &'a str,
    parameters: &'a [ConfigParameter],
}

impl HttpProvider {
    /// Create a provider for a gateway endpoint
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn service_path(cluster_name: &str, service_name: &str) -> String {
        format!("/v1/clusters/{}/services/{}", cluster_name, service_name)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::rejection(operation, response).await)
        }
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: RequestBuilder,
    ) -> Result<Option<T>> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            Ok(None)
        } else if status.is_success() {
            Ok(Some(response.json().await?))
        } else {
            Err(Self::rejection(operation, response).await)
        }
    }

    async fn execute(&self, operation: Operation, request: RequestBuilder) -> Result<()> {
        debug!(%operation, "Gateway call");
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(operation, response).await)
        }
    }

    async fn rejection(operation: Operation, response: reqwest::Response) -> InfrastructureError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return InfrastructureError::NotFound(operation.to_string());
        }
        let body = response.text().await.unwrap_or_default();
        InfrastructureError::rejected(
            operation.to_string(),
            format!("{} {}", status.as_u16(), body.trim()),
        )
    }
}

#[async_trait]
impl InfrastructureClient for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn describe_service(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Option<LiveServiceState>> {
        let path = Self::service_path(cluster_name, service_name);
        self.fetch_optional(Operation::DescribeService, self.client.get(self.url(&path)))
            .await
    }

    async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition> {
        let request = self
            .client
            .get(self.url("/v1/task-definitions"))
            .query(&[("arn", arn)]);
        self.fetch(Operation::DescribeTaskDefinition, request).await
    }

    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<TaskDefinitionRevision> {
        let request = self
            .client
            .post(self.url("/v1/task-definitions"))
            .json(definition);
        self.fetch(Operation::RegisterTaskDefinition, request).await
    }

    async fn create_service(&self, request: &ServiceRequest) -> Result<()> {
        let builder = self.client.post(self.url("/v1/services")).json(request);
        self.execute(Operation::CreateService, builder).await
    }

    async fn update_service(&self, request: &ServiceRequest) -> Result<()> {
        let builder = self.client.put(self.url("/v1/services")).json(request);
        self.execute(Operation::UpdateService, builder).await
    }

    async fn delete_service(&self, cluster_name: &str, service_name: &str) -> Result<()> {
        let path = Self::service_path(cluster_name, service_name);
        self.execute(Operation::DeleteService, self.client.delete(self.url(&path)))
            .await
    }

    async fn scale_service(
        &self,
        cluster_name: &str,
        service_name: &str,
        count: u32,
    ) -> Result<()> {
        let path = format!("{}/scale", Self::service_path(cluster_name, service_name));
        let builder = self
            .client
            .post(self.url(&path))
            .json(&ScaleRequest { count });
        self.execute(Operation::ScaleService, builder).await
    }

    async fn attach_scaling_policy(
        &self,
        cluster_name: &str,
        service_name: &str,
        policy: &ScalingPolicy,
    ) -> Result<()> {
        let path = format!(
            "{}/scaling-policy",
            Self::service_path(cluster_name, service_name)
        );
        let builder = self.client.put(self.url(&path)).json(policy);
        self.execute(Operation::AttachScalingPolicy, builder).await
    }

    async fn detach_scaling_policy(&self, cluster_name: &str, service_name: &str) -> Result<()> {
        let path = format!(
            "{}/scaling-policy",
            Self::service_path(cluster_name, service_name)
        );
        self.execute(
            Operation::DetachScalingPolicy,
            self.client.delete(self.url(&path)),
        )
        .await
    }

    async fn describe_capacity_group(&self, name: &str) -> Result<CapacityGroupState> {
        let path = format!("/v1/capacity-groups/{}", name);
        self.fetch(Operation::DescribeCapacityGroup, self.client.get(self.url(&path)))
            .await
    }

    async fn adjust_capacity_group(&self, name: &str, desired: u32, force: bool) -> Result<()> {
        let path = format!("/v1/capacity-groups/{}/adjust", name);
        let builder = self
            .client
            .post(self.url(&path))
            .json(&CapacityRequest { desired, force });
        self.execute(Operation::AdjustCapacityGroup, builder).await
    }

    async fn run_one_off_task(
        &self,
        cluster_name: &str,
        task_definition_arn: &str,
        command: &[String],
    ) -> Result<InvocationHandle> {
        let path = format!("/v1/clusters/{}/tasks", cluster_name);
        let builder = self.client.post(self.url(&path)).json(&RunTaskRequest {
            task_definition_arn,
            command,
        });
        self.fetch(Operation::RunOneOffTask, builder).await
    }

    async fn list_running_task_instances(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> Result<Vec<TaskInstance>> {
        let path = format!("{}/tasks", Self::service_path(cluster_name, service_name));
        let mut tasks: Vec<TaskInstance> = self
            .fetch(Operation::ListRunningTasks, self.client.get(self.url(&path)))
            .await?;
        tasks.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(tasks)
    }

    async fn kill_task_instance(&self, cluster_name: &str, task_id: &str) -> Result<()> {
        let path = format!("/v1/clusters/{}/tasks/{}", cluster_name, task_id);
        self.execute(Operation::KillTask, self.client.delete(self.url(&path)))
            .await
    }

    async fn put_parameters(&self, prefix: &str, parameters: &[ConfigParameter]) -> Result<()> {
        let builder = self
            .client
            .put(self.url("/v1/parameters"))
            .json(&ParametersRequest { prefix, parameters });
        self.execute(Operation::PutParameters, builder).await
    }

    async fn get_parameters(&self, prefix: &str) -> Result<Vec<ConfigParameter>> {
        let request = self
            .client
            .get(self.url("/v1/parameters"))
            .query(&[("prefix", prefix)]);
        let mut parameters: Vec<ConfigParameter> =
            self.fetch(Operation::GetParameters, request).await?;
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response and return the gateway URL
    async fn one_shot(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_provider_creation() {
        let provider = HttpProvider::new("http://localhost:8080").unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_endpoint_normalization() {
        let provider = HttpProvider::new("http://localhost:8080/").unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_describe_missing_service_is_none() {
        let url = one_shot("404 Not Found", "").await;
        let provider = HttpProvider::new(&url).unwrap();
        assert!(provider.describe_service("prod", "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_rejection() {
        let url = one_shot("409 Conflict", "\"service is draining\"").await;
        let provider = HttpProvider::new(&url).unwrap();
        let err = provider.scale_service("prod", "web", 2).await.unwrap_err();
        match err {
            InfrastructureError::Rejected { operation, detail } => {
                assert_eq!(operation, "scale_service");
                assert!(detail.contains("409"));
                assert!(detail.contains("draining"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_capacity_group_decodes() {
        let url = one_shot(
            "200 OK",
            r#"{"name":"asg","min_size":1,"max_size":4,"desired_capacity":2}"#,
        )
        .await;
        let provider = HttpProvider::new(&url).unwrap();
        let group = provider.describe_capacity_group("asg").await.unwrap();
        assert_eq!(group.max_size, 4);
    }
}
