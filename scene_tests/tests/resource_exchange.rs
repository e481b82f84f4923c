//! Scripted-peer tests for the reliable channel and the delta stream.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use scene_server::{
    bind_ephemeral,
    demo::{demo_catalog, DemoLoader},
    store::{ModelLoader, ResourceStore},
    GeomEdit,
};
use scene_shared::{
    id::ResourceId,
    logging,
    resources::{Model, Vertex},
    tcp::{ResourceKind, ResourcePacket, TcpMsg},
    udp::{decode_packet, Chunk, GeomDataType},
};
use scene_tests::{test_config, wait_until, ScriptedPeer};

fn cube_store() -> anyhow::Result<ResourceStore> {
    let mut store = ResourceStore::new();
    store.add_loaded(DemoLoader.load_model("cube")?);
    Ok(store)
}

fn ids(names: &[&str]) -> HashSet<ResourceId> {
    names.iter().map(|n| ResourceId::from_name(n)).collect()
}

#[test]
fn handshake_and_exchange_fill_sent_set() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), cube_store()?, Arc::new(DemoLoader))?;
    let handle = server.start()?;

    let mut peer = ScriptedPeer::connect(&cfg)?;
    let server_udp = peer.handshake()?;
    assert_ne!(server_udp, 0);
    assert!(wait_until(Duration::from_secs(2), || handle.is_client_connected()));

    peer.expect_msg(TcpMsg::StartRsrcExchange)?;
    peer.ack()?;
    let mut received = Vec::new();
    for kind in [
        ResourceKind::Model,
        ResourceKind::Material,
        ResourceKind::Texture,
        ResourceKind::Texture,
    ] {
        let packet = peer.expect_resource()?;
        assert_eq!(packet.kind(), kind);
        received.push(packet);
        peer.ack()?;
    }
    peer.expect_msg(TcpMsg::EndRsrcExchange)?;

    let ResourcePacket::Model(info) = &received[0] else {
        panic!("first resource is not a model");
    };
    assert_eq!(info.n_vertices, 24);
    assert_eq!(info.n_indices, 36);
    assert_eq!(info.materials, vec![ResourceId::from_name("cube_material")]);

    let expected = ids(&["cube", "cube_material", "cube_diffuse.png", "cube_normal.png"]);
    assert_eq!(handle.sent_ids(), expected);
    assert_eq!(handle.scene_nodes().len(), 1);

    handle.shutdown();
    assert!(peer.wait_dropped(Duration::from_secs(2)));
    Ok(())
}

#[test]
fn unencodable_model_is_skipped_and_exchange_continues() -> anyhow::Result<()> {
    logging::init_for_tests();
    let mut store = cube_store()?;
    let overfull = store.add_model(Model {
        name: ResourceId::from_name("overfull"),
        vertices: vec![Vertex::default(); 3],
        indices: vec![0, 1, 2],
        materials: (0..256)
            .map(|i| ResourceId::from_name(&format!("overfull_material_{i}")))
            .collect(),
        meshes: vec![],
    });
    let (server, cfg) = bind_ephemeral(test_config(), store, Arc::new(DemoLoader))?;
    let handle = server.start()?;

    let mut peer = ScriptedPeer::connect(&cfg)?;
    peer.handshake()?;
    let received = peer.accept_exchange()?;
    let got: HashSet<_> = received.iter().map(ResourcePacket::id).collect();
    let cube = ids(&["cube", "cube_material", "cube_diffuse.png", "cube_normal.png"]);
    assert_eq!(got, cube);
    assert_eq!(received.len(), 4);

    assert!(handle.is_client_connected());
    assert_eq!(handle.sent_ids(), cube);
    assert!(!handle.sent_ids().contains(&overfull));

    handle.shutdown();
    Ok(())
}

#[test]
fn geometry_streams_with_increasing_generations() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), cube_store()?, Arc::new(DemoLoader))?;
    let handle = server.start()?;
    let mut peer = ScriptedPeer::connect(&cfg)?;
    peer.handshake()?;
    peer.accept_exchange()?;

    let cube = ResourceId::from_name("cube");
    let mut generations = Vec::new();
    let mut copies: HashMap<u32, usize> = HashMap::new();
    let mut vertices_seen = 0usize;
    let mut indices_seen = 0usize;
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && (generations.len() < 20 || copies.len() < 2) {
        let Some(data) = peer.recv_udp(Duration::from_millis(200))? else {
            continue;
        };
        assert_eq!(data.len(), cfg.packet_size);
        let packet = decode_packet(&data)?;
        generations.push(packet.header.packet_gen);
        for chunk in packet.chunks {
            if let Chunk::Geom { header, payload } = chunk {
                assert_eq!(header.model_id, cube);
                assert_eq!(payload.len(), header.payload_len());
                let n = copies.entry(header.serial_id).or_default();
                if *n == 0 {
                    match header.data_type {
                        GeomDataType::Vertex => vertices_seen += header.len as usize,
                        GeomDataType::Index => indices_seen += header.len as usize,
                    }
                }
                *n += 1;
            }
        }
    }

    assert!(generations.len() >= 20, "only {} packets", generations.len());
    assert!(generations.windows(2).all(|w| w[0] < w[1]), "{generations:?}");
    assert_eq!(vertices_seen, 24);
    assert_eq!(indices_seen, 36);
    assert!(copies.values().all(|&n| n <= cfg.geom_redundancy as usize));

    handle.shutdown();
    Ok(())
}

#[test]
fn duplicate_requests_send_once() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), cube_store()?, Arc::new(DemoLoader))?;
    let handle = server.with_catalog(demo_catalog()).start()?;
    let mut peer = ScriptedPeer::connect(&cfg)?;
    peer.handshake()?;
    assert_eq!(peer.accept_exchange()?.len(), 4);

    // Already delivered.
    assert!(!handle.enqueue_model(ResourceId::from_name("cube")));
    peer.send(TcpMsg::ReqModel { index: 0 })?;
    // Out of range: logged and ignored.
    peer.send(TcpMsg::ReqModel { index: 99 })?;
    // "grid", twice.
    peer.send(TcpMsg::ReqModel { index: 1 })?;
    peer.send(TcpMsg::ReqModel { index: 1 })?;

    let received = peer.accept_exchange()?;
    let got: HashSet<_> = received.iter().map(ResourcePacket::id).collect();
    assert_eq!(
        got,
        ids(&["grid", "grid_material", "grid_diffuse.png", "grid_normal.png"])
    );
    assert_eq!(received.len(), 4);

    assert!(peer.recv_frame_timeout(Duration::from_millis(400))?.is_none());
    assert!(handle.is_client_connected());
    assert_eq!(handle.sent_ids().len(), 8);

    handle.shutdown();
    Ok(())
}

#[test]
fn geometry_edit_streams_changed_slice() -> anyhow::Result<()> {
    logging::init_for_tests();
    let (server, cfg) = bind_ephemeral(test_config(), cube_store()?, Arc::new(DemoLoader))?;
    let handle = server.start()?;
    let cube = ResourceId::from_name("cube");

    let mut peer = ScriptedPeer::connect(&cfg)?;
    peer.handshake()?;
    peer.accept_exchange()?;

    let edited = Vertex {
        uv: [0.125, 0.875],
        ..Vertex::default()
    };
    let queued = handle.push_geometry_edit(
        cube,
        GeomEdit::Vertices {
            start: 3,
            data: vec![edited; 2],
        },
    )?;
    assert_eq!(queued, 1);
    assert!(handle
        .push_geometry_edit(
            cube,
            GeomEdit::Indices {
                start: 35,
                data: vec![0, 0],
            },
        )
        .is_err());

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut found = false;
    while !found && Instant::now() < deadline {
        let Some(data) = peer.recv_udp(Duration::from_millis(200))? else {
            continue;
        };
        for chunk in decode_packet(&data)?.chunks {
            if let Chunk::Geom { header, mut payload } = chunk {
                if header.data_type == GeomDataType::Vertex && header.start == 3 && header.len == 2 {
                    assert_eq!(Vertex::get(&mut payload)?, edited);
                    found = true;
                }
            }
        }
    }
    assert!(found, "edited slice never arrived");

    handle.shutdown();
    Ok(())
}
