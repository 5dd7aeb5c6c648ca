//! # Direct Path Flows
//!
//! 1. Concurrent calls answered out of order reach the right callers
//! 2. `pending` acknowledgements hold the call open until the push
//! 3. Timeouts free the correlation entry; late answers are dropped
//! 4. Backend-initiated requests are answered on the same id
//! 5. Capacity of the correlation table is enforced

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bridge_ipc::{codes, BridgeConfig, InvokeOptions, IpcError, RequestEnvelope};
    use futures::future::join_all;
    use serde_json::{json, Value};

    use crate::harness::{connected_client, Reply};

    // =============================================================================
    // OUTBOUND
    // =============================================================================

    /// Replies are delayed in reverse order of arrival
    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_responses_route_by_id() {
        let (client, _backend) = connected_client(BridgeConfig::default(), |req| {
            let n = req.params.as_ref().and_then(|p| p["n"].as_u64()).unwrap_or(0);
            Reply::Delayed(Duration::from_millis(500 - n * 10), json!(n))
        });

        let calls = (0..20u64).map(|n| {
            let client = Arc::clone(&client);
            async move {
                client
                    .invoke("get_item", Some(json!({ "n": n })), InvokeOptions::default())
                    .await
            }
        });
        let results = join_all(calls).await;

        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!(n));
        }
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_call_waits_for_push() {
        let (client, _backend) = connected_client(BridgeConfig::default(), |_| {
            Reply::Acknowledged(Duration::from_secs(30), json!("finished"))
        });

        let result = client
            .invoke("export_all", None, InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!("finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_answer() {
        let (client, backend) = connected_client(BridgeConfig::default(), |_| {
            Reply::Delayed(Duration::from_millis(300), json!("late"))
        });

        let err = client
            .invoke(
                "slow_op",
                None,
                InvokeOptions::new().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TIMEOUT_ERROR);
        assert_eq!(client.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.pending_count(), 0);
        assert_eq!(backend.seen_methods(), vec!["slow_op"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout_floor() {
        let (client, _backend) = connected_client(BridgeConfig::default(), |_| {
            Reply::Delayed(Duration::from_secs(120), json!({"session": "s"}))
        });

        // 1s requested, raised to the 180s floor for login
        let result = client
            .invoke(
                "login",
                None,
                InvokeOptions::new().with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(result["session"], "s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_table_capacity() {
        let mut config = BridgeConfig::default();
        config.limits.max_pending = 2;
        let (client, _backend) = connected_client(config, |_| Reply::Silent);

        let a = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("a", None, InvokeOptions::default()).await })
        };
        let b = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("b", None, InvokeOptions::default()).await })
        };
        while client.pending_count() < 2 {
            tokio::task::yield_now().await;
        }

        let err = client
            .invoke("c", None, InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::QUEUE_FULL);

        client.dispose();
        assert_eq!(a.await.unwrap().unwrap_err().code, codes::DISCONNECTED);
        assert_eq!(b.await.unwrap().unwrap_err().code, codes::DISCONNECTED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_not_ready_budget_returns_last_error() {
        let mut config = BridgeConfig::default();
        config.retry.system_not_ready.max_elapsed = Some(Duration::from_secs(5));
        let (client, backend) = connected_client(config, |_| {
            Reply::Error(codes::SYSTEM_NOT_READY, "backend starting")
        });

        let err = client
            .invoke("get_all", None, InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SYSTEM_NOT_READY);
        // Attempts at 0s..=5s, one per second
        assert_eq!(backend.seen().len(), 6);
    }

    #[tokio::test]
    async fn test_calls_are_counted() {
        bridge_telemetry::register_metrics().unwrap();
        let (client, _backend) =
            connected_client(BridgeConfig::default(), |_| Reply::Success(json!(true)));

        let before = bridge_telemetry::IPC_REQUESTS_SENT.get();
        client
            .invoke("get_all", None, InvokeOptions::default())
            .await
            .unwrap();
        assert!(bridge_telemetry::IPC_REQUESTS_SENT.get() > before);

        let exposition = bridge_telemetry::encode_metrics().unwrap();
        assert!(exposition.contains("bridge_ipc_requests_sent_total"));
        assert!(exposition.contains("bridge_ipc_responses_received_total"));
    }

    // =============================================================================
    // INBOUND
    // =============================================================================

    #[tokio::test]
    async fn test_backend_calls_registered_handler() {
        let (client, backend) = connected_client(BridgeConfig::default(), |_| Reply::Silent);
        client
            .register_handler("task_updated", |req: RequestEnvelope| async move {
                let id = req.params.as_ref().map(|p| p["id"].clone()).unwrap_or(Value::Null);
                Ok::<Value, IpcError>(json!({ "ack": id }))
            })
            .unwrap();

        let response = backend
            .call("task_updated", Some(json!({"id": 7})))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({"ack": 7})));

        let response = backend.call("task_deleted", None).await.unwrap();
        assert_eq!(response.error_code(), Some(codes::HANDLER_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers() {
        let (client, backend) = connected_client(BridgeConfig::default(), |_| Reply::Silent);
        client
            .register_handler("crash", |req: RequestEnvelope| async move {
                if req.method == "crash" {
                    panic!("handler bug");
                }
                Ok::<Value, IpcError>(Value::Null)
            })
            .unwrap();

        let response = backend.call("crash", None).await.unwrap();
        assert_eq!(response.error_code(), Some(codes::HANDLER_ERROR));
    }
}
