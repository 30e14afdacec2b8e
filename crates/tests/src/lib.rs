//! # Integration Tests
//!
//! Cross-crate end-to-end tests over loopback sockets.
//!
//! Responsibilities:
//! - Configuration snapshot tests
//! - Server/client clock sync convergence
//! - Remote commands reaching a running sensor
//! - Stream publisher values fanned out to sensor nodes

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_default_blueprint_round_trips() {
        let blueprint = contracts::FieldBlueprint::default();
        let toml = ConfigLoader::to_toml(&blueprint).unwrap();
        let loaded = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(loaded.server.port, blueprint.server.port);
        assert_eq!(loaded.sync, blueprint.sync);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::future::Future;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ClientConfig, ClockSyncConfig, CommandSink, FieldBlueprint, HandlerKind, NoSensors,
        OutputConfig, PositionValue, SensorConfig, SensorSelector, ServerConfig, SharedClock,
        SystemClock, TimeMode, Vector3,
    };
    use control_plane::{ControlClient, ControlServer, StreamPublisher};
    use sensor_runtime::{build_sensors, SensorManager};
    use sync_engine::SourceSet;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    fn server_config(stream_port: Option<u16>) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            stream_port,
            sync_reply_timeout_s: 0.5,
            feed_rate_hz: 50.0,
        }
    }

    fn client_config(port: u16, require_sync: bool) -> ClientConfig {
        ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: port,
            require_sync,
            connect_timeout_s: 0.2,
            silence_timeout_s: 5.0,
        }
    }

    fn spawn_server(server: ControlServer) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run(async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });
        (stop, task)
    }

    fn spawn_client(mut client: ControlClient) -> (oneshot::Sender<()>, JoinHandle<ControlClient>) {
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            client
                .run(async {
                    let _ = stopped.await;
                })
                .await;
            client
        });
        (stop, task)
    }

    async fn bind_client(
        port: u16,
        require_sync: bool,
        sources: SourceSet,
        commands: Arc<dyn CommandSink>,
        clock: SharedClock,
    ) -> (ControlClient, SocketAddr) {
        let client = ControlClient::bind(
            client_config(port, require_sync),
            ClockSyncConfig::default(),
            sources,
            commands,
            clock,
        )
        .await
        .unwrap();
        // The server sees the loopback address, not the unspecified bind address.
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, client.local_addr().unwrap().port()));
        (client, peer)
    }

    async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        timeout(limit, async {
            while !check().await {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    fn read_csv(dir: &Path) -> String {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "csv"))
            .map(|entry| std::fs::read_to_string(entry.path()).unwrap_or_default())
            .collect()
    }

    /// Server time records drive the handshake until the client converges.
    #[tokio::test]
    async fn test_e2e_sync_converges_over_loopback() {
        let clock = SystemClock::shared();
        let server = ControlServer::bind(&server_config(None), clock.clone())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let publisher = server.publisher();
        let (server_stop, server_task) = spawn_server(server);

        let sources = SourceSet::new(TimeMode::RelativePrecise, clock.clone());
        let (client, peer) =
            bind_client(port, true, sources.clone(), Arc::new(NoSensors), clock.clone()).await;
        let (client_stop, client_task) = spawn_client(client);

        let synced = eventually(Duration::from_secs(10), || {
            let now = clock.now();
            publisher.new_time(now, now);
            let done = publisher.is_synced(&peer) == Some(true) && sources.time.is_set();
            async move { done }
        })
        .await;
        assert!(synced, "client never converged");

        // Both ends read the same system clock.
        assert!((sources.time.get() - clock.now()).abs() < 0.05);

        let metrics = publisher.session_metrics();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].1.sync_attempts >= 5);

        let _ = client_stop.send(());
        let client = client_task.await.unwrap();
        assert!(client.sync_summary().converged_rounds >= 1);
        assert_eq!(client.handler_address().map(|a| a.ip()), Some(Ipv4Addr::LOCALHOST.into()));

        let _ = server_stop.send(());
        server_task.await.unwrap();
    }

    /// A command published on the server lands in the sensor's CSV output.
    #[tokio::test]
    async fn test_e2e_command_reaches_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let clock = SystemClock::shared();

        let server = ControlServer::bind(&server_config(None), clock.clone())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let publisher = server.publisher();
        let (server_stop, server_task) = spawn_server(server);

        let blueprint = FieldBlueprint {
            output: OutputConfig {
                directory: dir.path().to_path_buf(),
                buffer_size: 0,
            },
            sensors: vec![SensorConfig {
                sensor_type: "mock".to_string(),
                name: "bench".to_string(),
                settings: HashMap::from([("rate_hz".to_string(), "50".to_string())]),
                handlers: vec![HandlerKind::Csv],
            }],
            ..FieldBlueprint::default()
        };
        let sources = SourceSet::new(TimeMode::Simple, clock.clone());
        let manager = Arc::new(SensorManager::new(
            build_sensors(&blueprint, &sources),
            blueprint.lifecycle.clone(),
        ));
        assert_eq!(manager.start_all(), 1);

        let (client, _) = bind_client(port, false, sources, manager.clone(), clock.clone()).await;
        let (client_stop, client_task) = spawn_client(client);

        let subscribed = eventually(Duration::from_secs(5), || {
            let done = publisher.session_count() == 1;
            async move { done }
        })
        .await;
        assert!(subscribed);

        publisher.send_command(SensorSelector::ByName("bench".to_string()), "mark");
        let recorded = eventually(Duration::from_secs(5), || {
            let done = read_csv(dir.path()).contains(",mark");
            async move { done }
        })
        .await;
        assert!(recorded, "command never reached the sensor");

        let _ = client_stop.send(());
        client_task.await.unwrap();

        let closer = manager.clone();
        let report = tokio::task::spawn_blocking(move || closer.close_sensors())
            .await
            .unwrap();
        assert!(report.all_closed());
        assert!(read_csv(dir.path()).starts_with("#utc_time,seq"));

        let _ = server_stop.send(());
        server_task.await.unwrap();
    }

    /// Positions pushed over the stream listener reach every subscribed node.
    #[tokio::test]
    async fn test_e2e_stream_publisher_fans_out() {
        let clock = SystemClock::shared();
        let server_sources = SourceSet::new(TimeMode::Simple, clock.clone());
        let server = ControlServer::bind(&server_config(Some(0)), clock.clone())
            .await
            .unwrap()
            .with_sources(server_sources.clone());
        let port = server.local_addr().unwrap().port();
        let stream_addr = server.stream_addr().unwrap();
        let publisher = server.publisher();
        let (server_stop, server_task) = spawn_server(server);

        let sources = SourceSet::new(TimeMode::Simple, clock.clone());
        let (client, _) =
            bind_client(port, false, sources.clone(), Arc::new(NoSensors), clock.clone()).await;
        let (client_stop, client_task) = spawn_client(client);

        let subscribed = eventually(Duration::from_secs(5), || {
            let done = publisher.session_count() == 1;
            async move { done }
        })
        .await;
        assert!(subscribed);

        let mut gps = StreamPublisher::connect(stream_addr.to_string(), clock.clone())
            .await
            .unwrap();
        let utc = clock.now();
        let position = PositionValue::new(utc, "ENU", Vector3::new(1.0, 2.0, 3.0), None);
        gps.send_position(position, clock.now()).await.unwrap();

        let delivered = eventually(Duration::from_secs(5), || {
            let done = sources.position.get().coords.x == 1.0;
            async move { done }
        })
        .await;
        assert!(delivered, "position never reached the client");

        let received = sources.position.get();
        assert_eq!(received.frame, "ENU");
        assert!((received.utc_time - utc).abs() < 1e-6);
        assert_eq!(server_sources.position.get().coords.z, 3.0);

        gps.close().await;
        let _ = client_stop.send(());
        client_task.await.unwrap();
        let _ = server_stop.send(());
        server_task.await.unwrap();
    }
}
