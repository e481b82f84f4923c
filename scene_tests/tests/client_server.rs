//! Full socket-based integration tests for client ↔ server communication.

use std::{sync::Arc, time::Duration};

use scene_client::{ClientResources, SceneClient};
use scene_server::{
    bind_ephemeral,
    demo::{demo_catalog, demo_store, DemoLoader},
    sim::SimOptions,
    store::ModelLoader,
};
use scene_shared::{id::ResourceId, logging, math::Vec3, resources::Camera};
use scene_tests::{test_config, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn client_receives_resources_geometry_and_deltas() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), demo_store(2)?, Arc::new(DemoLoader))?;
    let handle = server
        .with_catalog(demo_catalog())
        .with_simulation(SimOptions::default())
        .start()?;

    let resources = Arc::new(ClientResources::new());
    let client = SceneClient::connect(&cfg, resources.clone())?;
    assert!(client.is_connected());

    // Initial exchange: cube, its material and textures, two lights, two shaders.
    assert!(resources.wait_for(WAIT, |s| s.exchanges_completed >= 1));
    {
        let s = resources.lock();
        assert_eq!(s.received.len(), 8);
        assert_eq!(s.received[0], ResourceId::from_name("cube"));
        assert_eq!(s.materials.len(), 1);
        assert_eq!(s.textures.len(), 2);
        assert_eq!(s.lights.len(), 2);
        assert_eq!(s.shaders.len(), 2);
    }
    assert_eq!(handle.sent_ids().len(), 8);

    let cube = ResourceId::from_name("cube");
    let expected = DemoLoader.load_model("cube")?.model;
    assert!(resources.wait_for(WAIT, |s| s.models.get(&cube).is_some_and(|m| {
        m.vertices == expected.vertices && m.indices == expected.indices
    })));

    // Simulation deltas reach the client.
    assert!(resources.wait_for(WAIT, |s| s.transforms.contains_key(&cube)));
    let light = ResourceId::from_name("Light 0");
    let initial = resources.light(light).map(|l| l.color);
    assert!(resources.wait_for(WAIT, |s| s.lights.get(&light).map(|l| l.color) != initial));

    // On-demand model.
    client.request_model(2)?;
    let quad = ResourceId::from_name("quad");
    let expected = DemoLoader.load_model("quad")?.model;
    assert!(resources.wait_for(WAIT, |s| s.models.get(&quad).is_some_and(|m| {
        m.vertices == expected.vertices && m.indices == expected.indices
    })));
    assert!(resources.wait_for(WAIT, |s| s.exchanges_completed >= 2));
    assert!(handle.sent_ids().contains(&quad));

    // Every queued geometry copy was either sent or pruned.
    assert!(wait_until(WAIT, || handle.pending_geometry() == 0));

    client.disconnect();
    assert!(wait_until(WAIT, || !handle.is_client_connected()));
    assert!(resources.lock().disconnected);
    handle.shutdown();
    Ok(())
}

#[test]
fn camera_telemetry_reaches_server() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), demo_store(0)?, Arc::new(DemoLoader))?;
    let handle = server.start()?;

    let resources = Arc::new(ClientResources::new());
    let client = SceneClient::connect(&cfg, resources)?;
    let camera = Camera {
        position: Vec3::new(1.0, 2.0, 3.0),
        yaw: 0.5,
        pitch: -0.25,
    };
    client.set_camera(camera);
    assert!(wait_until(WAIT, || handle.client_camera() == Some(camera)));

    client.disconnect();
    handle.shutdown();
    Ok(())
}

#[test]
fn server_shutdown_disconnects_client() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), demo_store(0)?, Arc::new(DemoLoader))?;
    let handle = server.start()?;

    let resources = Arc::new(ClientResources::new());
    let client = SceneClient::connect(&cfg, resources.clone())?;
    assert!(resources.wait_for(WAIT, |s| s.exchanges_completed >= 1));

    handle.shutdown();
    assert!(resources.wait_for(WAIT, |s| s.disconnected));
    assert!(!client.is_connected());
    assert!(client.request_model(0).is_err());
    Ok(())
}
