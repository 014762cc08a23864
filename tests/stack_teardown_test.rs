use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use bucketeer::stack::{
    ResourceStatus, Stack, StackApi, StackResource, StackStatus, StackTeardown,
};
use bucketeer::{Error, Result};

const STACK: &str = "jx-dev-cluster";

/// Scripted stack API; empty queues answer with success or nothing
#[derive(Default)]
struct FakeStacks {
    delete_calls: Mutex<Vec<Vec<String>>>,
    delete_error: Mutex<Option<Error>>,
    waits: Mutex<VecDeque<Result<()>>>,
    described: Mutex<VecDeque<Vec<Stack>>>,
    resources: Mutex<VecDeque<Vec<StackResource>>>,
    all: Vec<Stack>,
}

impl FakeStacks {
    fn wait_results(self, results: Vec<Result<()>>) -> Self {
        *self.waits.lock().unwrap() = results.into();
        self
    }

    fn describe_results(self, results: Vec<Vec<Stack>>) -> Self {
        *self.described.lock().unwrap() = results.into();
        self
    }

    fn resource_results(self, results: Vec<Vec<StackResource>>) -> Self {
        *self.resources.lock().unwrap() = results.into();
        self
    }

    fn deletes(&self) -> Vec<Vec<String>> {
        self.delete_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StackApi for FakeStacks {
    async fn delete_stack(&self, _name: &str, retain: &[String]) -> Result<()> {
        self.delete_calls.lock().unwrap().push(retain.to_vec());
        match self.delete_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn wait_until_deleted(&self, _name: &str) -> Result<()> {
        self.waits.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn describe_stacks(&self, name: Option<&str>) -> Result<Vec<Stack>> {
        match name {
            Some(_) => Ok(self
                .described
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()),
            None => Ok(self.all.clone()),
        }
    }

    async fn describe_stack_resources(&self, _name: &str) -> Result<Vec<StackResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

fn not_ready() -> Result<()> {
    Err(Error::not_ready("WaitUntilStackDeleteComplete", STACK))
}

fn resource(id: &str, status: ResourceStatus) -> StackResource {
    StackResource {
        logical_id: id.to_string(),
        status,
    }
}

#[tokio::test]
async fn test_first_attempt_success_reports_deleted_stack() {
    let teardown = StackTeardown::new(FakeStacks::default());

    let stack = teardown.delete_stack(STACK).await.unwrap();

    assert_eq!(stack.name, STACK);
    assert_eq!(stack.status, StackStatus::DeleteComplete);
    assert_eq!(teardown.api().deletes(), vec![Vec::<String>::new()]);
}

#[tokio::test]
async fn test_retry_retains_failed_resources() {
    let api = FakeStacks::default()
        .wait_results(vec![not_ready(), not_ready()])
        .describe_results(vec![vec![Stack::new(STACK, StackStatus::DeleteFailed)]])
        .resource_results(vec![
            vec![
                resource("VpcEndpoint", ResourceStatus::DeleteFailed),
                resource("NodeRole", ResourceStatus::DeleteComplete),
            ],
            vec![
                resource("VpcEndpoint", ResourceStatus::DeleteFailed),
                resource("NodeRole", ResourceStatus::DeleteComplete),
            ],
        ]);
    let teardown = StackTeardown::new(api);

    let stack = teardown.delete_stack(STACK).await.unwrap();

    assert_eq!(stack.status, StackStatus::DeleteFailed);
    assert_eq!(stack.resources.len(), 2);
    assert_eq!(
        teardown.api().deletes(),
        vec![Vec::new(), vec!["VpcEndpoint".to_string()]]
    );
}

#[tokio::test]
async fn test_retry_ending_outside_delete_failed_is_irrecoverable() {
    let api = FakeStacks::default()
        .wait_results(vec![not_ready(), Ok(())])
        .describe_results(vec![vec![Stack::new(STACK, StackStatus::DeleteInProgress)]])
        .resource_results(vec![vec![resource("Bucket", ResourceStatus::DeleteFailed)]]);
    let teardown = StackTeardown::new(api);

    let err = teardown.delete_stack(STACK).await.unwrap_err();

    assert!(matches!(err, Error::Irrecoverable(_)));
    assert_eq!(teardown.api().deletes().len(), 2);
}

#[tokio::test]
async fn test_stack_gone_after_retry_is_irrecoverable() {
    let api = FakeStacks::default()
        .wait_results(vec![not_ready(), Ok(())])
        .resource_results(vec![vec![resource("Bucket", ResourceStatus::DeleteFailed)]]);
    let teardown = StackTeardown::new(api);

    let err = teardown.delete_stack(STACK).await.unwrap_err();

    assert!(matches!(err, Error::Irrecoverable(_)));
}

#[tokio::test]
async fn test_unexpected_failed_resource_is_irrecoverable() {
    let api = FakeStacks::default()
        .wait_results(vec![not_ready(), not_ready()])
        .describe_results(vec![vec![Stack::new(STACK, StackStatus::DeleteFailed)]])
        .resource_results(vec![
            vec![resource("Bucket", ResourceStatus::DeleteFailed)],
            vec![
                resource("Bucket", ResourceStatus::DeleteFailed),
                resource("SecurityGroup", ResourceStatus::DeleteFailed),
            ],
        ]);
    let teardown = StackTeardown::new(api);

    let err = teardown.delete_stack(STACK).await.unwrap_err();

    match err {
        Error::Irrecoverable(message) => assert!(message.contains("SecurityGroup")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_other_first_attempt_errors_are_not_retried() {
    let api = FakeStacks::default();
    *api.delete_error.lock().unwrap() = Some(Error::transport(
        "DeleteStack",
        STACK,
        Some("AccessDenied".to_string()),
        "not authorized",
    ));
    let teardown = StackTeardown::new(api);

    let err = teardown.delete_stack(STACK).await.unwrap_err();

    assert_eq!(err.code(), Some("AccessDenied"));
    assert_eq!(teardown.api().deletes().len(), 1);
}

#[tokio::test]
async fn test_describe_stack_requires_exactly_one_match() {
    let teardown = StackTeardown::new(FakeStacks::default().describe_results(vec![
        vec![],
        vec![
            Stack::new(STACK, StackStatus::CreateComplete),
            Stack::new(STACK, StackStatus::DeleteComplete),
        ],
        vec![Stack::new(STACK, StackStatus::UpdateComplete)],
    ]));

    assert!(teardown.describe_stack(STACK).await.unwrap_err().is_not_found());
    assert!(matches!(
        teardown.describe_stack(STACK).await,
        Err(Error::AmbiguousResult(_))
    ));
    assert_eq!(
        teardown.describe_stack(STACK).await.unwrap().status,
        StackStatus::UpdateComplete
    );
}

#[tokio::test]
async fn test_list_stacks_applies_predicate() {
    let api = FakeStacks {
        all: vec![
            Stack::new("jx-a", StackStatus::CreateComplete),
            Stack::new("other", StackStatus::CreateComplete),
            Stack::new("jx-b", StackStatus::DeleteFailed),
        ],
        ..Default::default()
    };
    let teardown = StackTeardown::new(api);

    let all = teardown.list_stacks(None).await.unwrap();
    assert_eq!(all.len(), 3);

    let jx_only = |s: &Stack| s.name.starts_with("jx-");
    let names: Vec<String> = teardown
        .list_stacks(Some(&jx_only))
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["jx-a", "jx-b"]);
}
