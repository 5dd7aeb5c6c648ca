//! # Queue Flows
//!
//! Priority queue in front of the real transport:
//!
//! 1. Backpressure at the queue cap
//! 2. Priority order under a concurrency limit of one
//! 3. Transient backend errors retried with growing delays, then given up
//! 4. Cancellation and diagnostics

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bridge_ipc::{codes, BridgeConfig, InvokeOptions, Priority, RequestStatus};
    use serde_json::json;
    use tokio::time::Instant;

    use crate::harness::{connected_client, Reply};

    fn queued(priority: Priority) -> InvokeOptions {
        InvokeOptions::new().with_priority(priority)
    }

    fn single_lane() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.limits.max_concurrency = 1;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_backpressure() {
        let mut config = single_lane();
        config.limits.max_queue = 3;
        let (client, _backend) = connected_client(config, |_| Reply::Silent);

        let _held: Vec<_> = (0..3)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.invoke("hold", None, queued(Priority::Normal)).await })
            })
            .collect();
        while client.queue_stats().total < 3 {
            tokio::task::yield_now().await;
        }
        let before = client.queue_stats();

        let err = client
            .invoke("overflow", None, queued(Priority::Urgent))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::QUEUE_FULL);
        assert_eq!(client.queue_stats(), before);

        assert_eq!(client.clear_queue(), 3);
        assert_eq!(client.queue_stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_single_lane() {
        let (client, backend) = connected_client(single_lane(), |req| {
            if req.method == "first" {
                Reply::Delayed(Duration::from_secs(1), json!(null))
            } else {
                Reply::Success(json!(req.method))
            }
        });

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("first", None, queued(Priority::Low)).await })
        };
        while client.requests_by_status(RequestStatus::Executing).is_empty() {
            tokio::task::yield_now().await;
        }

        let submissions = [
            ("low", Priority::Low),
            ("normal_a", Priority::Normal),
            ("urgent", Priority::Urgent),
            ("normal_b", Priority::Normal),
            ("high", Priority::High),
        ];
        let mut handles = Vec::new();
        for (method, priority) in submissions {
            let submitter = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                submitter.invoke(method, None, queued(priority)).await
            }));
            // Admission in submission order
            while client.queue_stats().pending < handles.len() {
                tokio::task::yield_now().await;
            }
        }

        first.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            backend.seen_methods(),
            vec!["first", "urgent", "high", "normal_a", "normal_b", "low"]
        );
        assert_eq!(client.queue_stats().completed, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_then_failed() {
        let (client, backend) = connected_client(single_lane(), |_| {
            Reply::Error(codes::NETWORK_ERROR, "connection reset")
        });

        let options = queued(Priority::High)
            .with_max_retries(3)
            .with_retry_delay(Duration::from_millis(200))
            .with_backoff_multiplier(2.0);
        let started = Instant::now();
        let err = client.invoke("sync_data", None, options).await.unwrap_err();

        assert_eq!(err.code, codes::NETWORK_ERROR);
        assert_eq!(backend.seen().len(), 4);
        // 200 + 400 + 800
        assert!(started.elapsed() >= Duration::from_millis(1400));

        let stats = client.queue_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let (client, _backend) = connected_client(single_lane(), move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Reply::Error("TEMPORARY_ERROR", "try again")
            } else {
                Reply::Success(json!("ok"))
            }
        });

        let result = client
            .invoke("sync_data", None, queued(Priority::Normal))
            .await
            .unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(client.queue_stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_waiting_request() {
        let (client, backend) = connected_client(single_lane(), |req| {
            if req.method == "blocker" {
                Reply::Delayed(Duration::from_secs(2), json!(null))
            } else {
                Reply::Success(json!(null))
            }
        });

        let blocker = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("blocker", None, queued(Priority::Normal)).await })
        };
        while client.requests_by_status(RequestStatus::Executing).is_empty() {
            tokio::task::yield_now().await;
        }
        let victim = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("victim", None, queued(Priority::Normal)).await })
        };
        while client.queue_stats().total < 2 {
            tokio::task::yield_now().await;
        }

        let pending = client.requests_by_status(RequestStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, "victim");
        assert!(client.cancel_request(&pending[0].id));

        assert_eq!(victim.await.unwrap().unwrap_err().code, codes::CANCELLED);
        blocker.await.unwrap().unwrap();
        assert_eq!(backend.seen_methods(), vec!["blocker"]);
        assert!(client.all_requests().is_empty());
    }
}
