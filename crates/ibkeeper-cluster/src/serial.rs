//! Serialized access to a cluster transport.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::control::ClusterControl;
use crate::error::ClusterError;
use crate::types::{LockRequest, UnitInfo, UnitMetadata};

type Job<C> = Box<dyn FnOnce(Arc<C>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A [`ClusterControl`] that forwards cluster calls to a single worker task.
///
/// The worker runs one call to completion before taking the next, so the
/// wrapped transport never sees concurrent calls however many unit tasks
/// share this handle. A call that panics is reported to its caller as
/// [`ClusterError::WorkerGone`]; the worker keeps serving the rest.
///
/// [`unit_metadata`](ClusterControl::unit_metadata) runs a designer process
/// rather than a cluster call. It goes to the transport directly so that a
/// long dump never holds up other units' lock and unlock calls.
pub struct SerialCluster<C> {
  sender: mpsc::Sender<Job<C>>,
  client: Arc<C>,
}

impl<C> Clone for SerialCluster<C> {
  fn clone(&self) -> Self {
    Self {
      sender: self.sender.clone(),
      client: self.client.clone(),
    }
  }
}

impl<C: ClusterControl + 'static> SerialCluster<C> {
  /// Spawn the worker on the current runtime.
  pub fn spawn(client: C) -> Self {
    Self::with_buffer_size(client, 64)
  }

  /// Spawn the worker with a custom queue length.
  pub fn with_buffer_size(client: C, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    let client = Arc::new(client);
    tokio::spawn(worker(client.clone(), receiver));
    Self { sender, client }
  }

  async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, ClusterError>
  where
    T: Send + 'static,
    F: FnOnce(Arc<C>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ClusterError>> + Send + 'static,
  {
    let (reply, response) = oneshot::channel();
    let job: Job<C> = Box::new(move |client| {
      Box::pin(async move {
        let _ = reply.send(f(client).await);
      })
    });

    self
      .sender
      .send(job)
      .await
      .map_err(|_| ClusterError::WorkerGone)?;

    response.await.map_err(|_| {
      debug!(operation, "cluster call dropped without a reply");
      ClusterError::WorkerGone
    })?
  }
}

async fn worker<C: ClusterControl + 'static>(client: Arc<C>, mut receiver: mpsc::Receiver<Job<C>>) {
  while let Some(job) = receiver.recv().await {
    if AssertUnwindSafe(job(client.clone())).catch_unwind().await.is_err() {
      error!("cluster call panicked");
    }
  }
  debug!("cluster worker stopped");
}

#[async_trait]
impl<C: ClusterControl + 'static> ClusterControl for SerialCluster<C> {
  async fn list_units(&self) -> Result<Vec<String>, ClusterError> {
    self
      .call("list_units", |c| async move { c.list_units().await })
      .await
  }

  async fn lock(&self, unit: &str, request: &LockRequest) -> Result<(), ClusterError> {
    let unit = unit.to_string();
    let request = request.clone();
    self
      .call("lock", move |c| async move { c.lock(&unit, &request).await })
      .await
  }

  async fn terminate_sessions(&self, unit: &str) -> Result<usize, ClusterError> {
    let unit = unit.to_string();
    self
      .call("terminate_sessions", move |c| async move {
        c.terminate_sessions(&unit).await
      })
      .await
  }

  async fn unlock(&self, unit: &str) -> Result<(), ClusterError> {
    let unit = unit.to_string();
    self
      .call("unlock", move |c| async move { c.unlock(&unit).await })
      .await
  }

  async fn unit_info(&self, unit: &str) -> Result<UnitInfo, ClusterError> {
    let unit = unit.to_string();
    self
      .call("unit_info", move |c| async move { c.unit_info(&unit).await })
      .await
  }

  async fn unit_metadata(
    &self,
    unit: &str,
    user: &str,
    password: &str,
  ) -> Result<UnitMetadata, ClusterError> {
    self.client.unit_metadata(unit, user, password).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use tokio::sync::Notify;

  /// Records the highest number of calls observed in flight at once.
  #[derive(Default)]
  struct Recorder {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    /// Holds `unit_metadata` until notified.
    dump_gate: Notify,
  }

  #[async_trait]
  impl ClusterControl for Arc<Recorder> {
    async fn list_units(&self) -> Result<Vec<String>, ClusterError> {
      panic!("transport crashed");
    }

    async fn lock(&self, _unit: &str, _request: &LockRequest) -> Result<(), ClusterError> {
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(10)).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      Ok(())
    }

    async fn terminate_sessions(&self, _unit: &str) -> Result<usize, ClusterError> {
      Ok(0)
    }

    async fn unlock(&self, _unit: &str) -> Result<(), ClusterError> {
      Ok(())
    }

    async fn unit_info(&self, unit: &str) -> Result<UnitInfo, ClusterError> {
      Err(ClusterError::UnitNotFound(unit.to_string()))
    }

    async fn unit_metadata(
      &self,
      _unit: &str,
      _user: &str,
      _password: &str,
    ) -> Result<UnitMetadata, ClusterError> {
      self.dump_gate.notified().await;
      Ok(UnitMetadata {
        config_name: "Accounting".to_string(),
        config_version: "3.0.1".to_string(),
      })
    }
  }

  fn request() -> LockRequest {
    LockRequest {
      permission_code: "0000".to_string(),
      message: "maintenance".to_string(),
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_calls_never_overlap() {
    let recorder = Arc::new(Recorder::default());
    let cluster = SerialCluster::spawn(recorder.clone());

    let mut handles = Vec::new();
    for i in 0..8 {
      let cluster = cluster.clone();
      handles.push(tokio::spawn(async move {
        cluster.lock(&format!("unit{}", i), &request()).await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }

    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_panicking_call_does_not_stop_worker() {
    let cluster = SerialCluster::spawn(Arc::new(Recorder::default()));

    let err = cluster.list_units().await.unwrap_err();
    assert!(matches!(err, ClusterError::WorkerGone));

    cluster.lock("payroll", &request()).await.unwrap();
  }

  #[tokio::test]
  async fn test_errors_pass_through() {
    let cluster = SerialCluster::spawn(Arc::new(Recorder::default()));
    let err = cluster.unit_info("payroll").await.unwrap_err();
    assert!(matches!(err, ClusterError::UnitNotFound(name) if name == "payroll"));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_metadata_dump_does_not_block_locks() {
    let recorder = Arc::new(Recorder::default());
    let cluster = SerialCluster::spawn(recorder.clone());

    let dumping = cluster.clone();
    let dump = tokio::spawn(async move { dumping.unit_metadata("payroll", "admin", "pw").await });
    tokio::task::yield_now().await;

    tokio::time::timeout(Duration::from_secs(5), cluster.lock("stock", &request()))
      .await
      .expect("lock queued behind the metadata dump")
      .unwrap();
    tokio::time::timeout(Duration::from_secs(5), cluster.unlock("stock"))
      .await
      .expect("unlock queued behind the metadata dump")
      .unwrap();

    recorder.dump_gate.notify_one();
    let metadata = dump.await.unwrap().unwrap();
    assert_eq!(metadata.config_version, "3.0.1");
  }
}
