//! Infrastructure stack teardown
//!
//! Deleting a stack can leave resources behind that refuse to go away. The
//! teardown makes one plain delete attempt; if the stack does not reach a
//! terminal state it retries once, retaining the resources that failed to
//! delete, and then checks that only those resources are left.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;

use crate::{Error, Result};

pub mod cloudformation;

pub use cloudformation::CloudFormationApi;

/// Lifecycle state of a stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackStatus {
    CreateComplete,
    UpdateComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    Other(String),
}

impl StackStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "CREATE_COMPLETE" => StackStatus::CreateComplete,
            "UPDATE_COMPLETE" => StackStatus::UpdateComplete,
            "DELETE_IN_PROGRESS" => StackStatus::DeleteInProgress,
            "DELETE_FAILED" => StackStatus::DeleteFailed,
            "DELETE_COMPLETE" => StackStatus::DeleteComplete,
            other => StackStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single stack resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    DeleteSkipped,
    Other(String),
}

impl ResourceStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "DELETE_IN_PROGRESS" => ResourceStatus::DeleteInProgress,
            "DELETE_FAILED" => ResourceStatus::DeleteFailed,
            "DELETE_COMPLETE" => ResourceStatus::DeleteComplete,
            "DELETE_SKIPPED" => ResourceStatus::DeleteSkipped,
            other => ResourceStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    pub status: ResourceStatus,
}

/// Snapshot of a remote stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    pub status: StackStatus,
    pub resources: Vec<StackResource>,
}

impl Stack {
    pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
        Self {
            name: name.into(),
            status,
            resources: Vec::new(),
        }
    }
}

/// Remote operations needed to tear a stack down
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Request deletion, keeping the resources named in `retain`
    async fn delete_stack(&self, name: &str, retain: &[String]) -> Result<()>;

    /// Block until the delete completes.
    ///
    /// Returns `Error::NotReady` when the stack ends in a failed state or does
    /// not settle in time.
    async fn wait_until_deleted(&self, name: &str) -> Result<()>;

    /// Describe one stack by name, or every stack when `name` is `None`.
    ///
    /// A name that matches nothing yields an empty list.
    async fn describe_stacks(&self, name: Option<&str>) -> Result<Vec<Stack>>;

    async fn describe_stack_resources(&self, name: &str) -> Result<Vec<StackResource>>;
}

/// Stack deletion with a single retain-and-retry fallback
pub struct StackTeardown<A> {
    api: A,
}

impl<A: StackApi> StackTeardown<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Delete `name`, retrying once while retaining undeletable resources.
    ///
    /// Returns the last observed snapshot of the stack.
    pub async fn delete_stack(&self, name: &str) -> Result<Stack> {
        let err = match self.delete_and_wait(name, &[]).await {
            Ok(()) => return self.describe_or_deleted(name).await,
            Err(e) if e.is_not_ready() => e,
            Err(e) => return Err(e),
        };

        tracing::info!("Stack {} was not deleted ({}), retrying", name, err);

        let retain = self.failed_resources(name).await?;
        tracing::info!(
            "Retrying deletion of stack {} retaining {} resources: {:?}",
            name,
            retain.len(),
            retain
        );

        match self.delete_and_wait(name, &retain).await {
            Ok(()) => {}
            Err(e) if e.is_not_ready() => {}
            Err(e) => return Err(e),
        }

        let stack = self.describe_or_deleted(name).await?;
        if stack.status != StackStatus::DeleteFailed {
            return Err(Error::Irrecoverable(format!(
                "unable to delete the stack {} after two attempts (status {})",
                name, stack.status
            )));
        }

        // DELETE_FAILED is expected here only when the retained resources are
        // the ones left behind
        let retained: HashSet<&str> = retain.iter().map(String::as_str).collect();
        let resources = self.api.describe_stack_resources(name).await?;
        let unexpected: Vec<&str> = resources
            .iter()
            .filter(|r| r.status == ResourceStatus::DeleteFailed)
            .filter(|r| !retained.contains(r.logical_id.as_str()))
            .map(|r| r.logical_id.as_str())
            .collect();

        if !unexpected.is_empty() {
            return Err(Error::Irrecoverable(format!(
                "unable to delete the stack {} after two attempts, resources {:?} failed to delete",
                name, unexpected
            )));
        }

        Ok(Stack { resources, ..stack })
    }

    /// Every stack, optionally filtered by `predicate`
    pub async fn list_stacks(
        &self,
        predicate: Option<&(dyn Fn(&Stack) -> bool + Send + Sync)>,
    ) -> Result<Vec<Stack>> {
        let stacks = self.api.describe_stacks(None).await?;

        for stack in &stacks {
            tracing::debug!("Described stack {}", stack.name);
        }

        Ok(match predicate {
            Some(predicate) => stacks.into_iter().filter(|s| predicate(s)).collect(),
            None => stacks,
        })
    }

    /// The single stack named `name`
    pub async fn describe_stack(&self, name: &str) -> Result<Stack> {
        let mut stacks = self.api.describe_stacks(Some(name)).await?;

        match stacks.len() {
            0 => Err(Error::not_found(format!("stack {}", name))),
            1 => Ok(stacks.remove(0)),
            n => Err(Error::AmbiguousResult(format!(
                "{} stacks match the name {}",
                n, name
            ))),
        }
    }

    async fn delete_and_wait(&self, name: &str, retain: &[String]) -> Result<()> {
        self.api.delete_stack(name, retain).await?;
        self.api.wait_until_deleted(name).await
    }

    async fn describe_or_deleted(&self, name: &str) -> Result<Stack> {
        match self.describe_stack(name).await {
            Err(e) if e.is_not_found() => Ok(Stack::new(name, StackStatus::DeleteComplete)),
            other => other,
        }
    }

    async fn failed_resources(&self, name: &str) -> Result<Vec<String>> {
        let resources = self.api.describe_stack_resources(name).await?;
        Ok(resources
            .into_iter()
            .filter(|r| r.status == ResourceStatus::DeleteFailed)
            .map(|r| r.logical_id)
            .collect())
    }
}
