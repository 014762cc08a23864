//! CloudFormation-backed stack operations

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::client::Waiters;
use aws_sdk_cloudformation::config::Region;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::Client;
use aws_smithy_runtime_api::client::waiters::error::WaiterError;

use crate::config::AppConfig;
use crate::storage::with_timeout;
use crate::{Error, Result};

use super::{ResourceStatus, Stack, StackApi, StackResource, StackStatus};

/// [`StackApi`] over the AWS CloudFormation API
pub struct CloudFormationApi {
    client: Client,
    /// Deadline for single API calls
    timeout: Duration,
    /// Upper bound for the delete-complete waiter
    wait_timeout: Duration,
}

impl CloudFormationApi {
    pub fn new(client: Client, timeout: Duration, wait_timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            wait_timeout,
        }
    }

    pub async fn from_region(region: &str, timeout: Duration, wait_timeout: Duration) -> Result<Self> {
        if region.trim().is_empty() {
            return Err(Error::configuration("a region is required to manage stacks"));
        }

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.trim().to_string()))
            .load()
            .await;

        Ok(Self::new(Client::new(&config), timeout, wait_timeout))
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Client for the cluster region, with the storage call deadline and the
    /// configured stack wait timeout
    pub async fn from_app_config(config: &AppConfig) -> Result<Self> {
        let cluster = config.cluster.as_ref().ok_or_else(|| {
            Error::configuration("stack teardown requires a cluster section with a region")
        })?;

        Self::from_region(
            &cluster.region,
            config.storage_settings().timeout,
            config.stack.wait_timeout(),
        )
        .await
    }
}

fn sdk_error<E, R>(operation: &str, resource: &str, err: &SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(|c| c.to_string());
    Error::transport(
        operation,
        resource,
        code,
        format!("{}", DisplayErrorContext(err)),
    )
}

/// CloudFormation reports unknown stack names as a validation error
fn is_missing_stack<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    err.as_service_error()
        .map(|e| {
            e.code() == Some("ValidationError")
                && e.message().map_or(false, |m| m.contains("does not exist"))
        })
        .unwrap_or(false)
}

#[async_trait]
impl StackApi for CloudFormationApi {
    async fn delete_stack(&self, name: &str, retain: &[String]) -> Result<()> {
        let retain = if retain.is_empty() {
            None
        } else {
            Some(retain.to_vec())
        };

        with_timeout(self.timeout, "DeleteStack", async {
            self.client
                .delete_stack()
                .stack_name(name)
                .set_retain_resources(retain)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteStack", name, &e))?;
            Ok(())
        })
        .await
    }

    async fn wait_until_deleted(&self, name: &str) -> Result<()> {
        let result = self
            .client
            .wait_until_stack_delete_complete()
            .stack_name(name)
            .wait(self.wait_timeout)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(WaiterError::ExceededMaxWait(_)) | Err(WaiterError::FailureState(_)) => {
                Err(Error::not_ready("WaitUntilStackDeleteComplete", name))
            }
            Err(e) => Err(Error::transport(
                "WaitUntilStackDeleteComplete",
                name,
                None,
                format!("{}", DisplayErrorContext(&e)),
            )),
        }
    }

    async fn describe_stacks(&self, name: Option<&str>) -> Result<Vec<Stack>> {
        let resource = name.unwrap_or("*");

        with_timeout(self.timeout, "DescribeStacks", async {
            let mut stacks = Vec::new();
            let mut next_token = None;

            loop {
                let output = match self
                    .client
                    .describe_stacks()
                    .set_stack_name(name.map(str::to_string))
                    .set_next_token(next_token.take())
                    .send()
                    .await
                {
                    Ok(output) => output,
                    Err(e) if is_missing_stack(&e) => return Ok(Vec::new()),
                    Err(e) => return Err(sdk_error("DescribeStacks", resource, &e)),
                };

                for stack in output.stacks() {
                    let status = stack.stack_status().map(|s| s.as_str()).unwrap_or_default();
                    stacks.push(Stack::new(
                        stack.stack_name().unwrap_or_default(),
                        StackStatus::parse(status),
                    ));
                }

                match output.next_token() {
                    Some(token) => next_token = Some(token.to_string()),
                    None => break,
                }
            }

            Ok(stacks)
        })
        .await
    }

    async fn describe_stack_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        with_timeout(self.timeout, "DescribeStackResources", async {
            let output = self
                .client
                .describe_stack_resources()
                .stack_name(name)
                .send()
                .await
                .map_err(|e| sdk_error("DescribeStackResources", name, &e))?;

            Ok(output
                .stack_resources()
                .iter()
                .map(|r| StackResource {
                    logical_id: r.logical_resource_id().unwrap_or_default().to_string(),
                    status: ResourceStatus::parse(
                        r.resource_status().map(|s| s.as_str()).unwrap_or_default(),
                    ),
                })
                .collect())
        })
        .await
    }
}
