// DNSSEC key sync integration tests
//
// Runs real nodes (HTTP API + syncer) on ephemeral localhost ports and checks
// that public keys propagate with the newest-wins rule.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gslb_dnssec::dns::{
    rrsig_signing_input, spawn_dnssec_api, DnsMessage, DnsRecord, DnsRecordType, DnsRecordValue,
    DnsResponse, DnssecAlgorithm, DnssecApi, DnssecConfig, DnssecSigner, KeyPair, KeyRegistry,
    KeyStore, KeySyncConfig, KeySyncer, KvStore, MemoryKvStore, Nsec3Config, Nsec3Engine,
    Question, RRset, SqliteKvStore,
};
use tokio::sync::oneshot;

struct TestNode {
    registry: Arc<KeyRegistry>,
    key_store: Arc<KeyStore>,
    signer: Arc<DnssecSigner>,
    syncer: Arc<KeySyncer>,
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestNode {
    async fn start(node_id: &str, peers: Vec<String>, kv: Arc<dyn KvStore>) -> TestNode {
        let registry = Arc::new(KeyRegistry::new(node_id));
        let key_store = Arc::new(KeyStore::new(kv, registry.clone()));
        let nsec3 = Arc::new(Nsec3Engine::new(Nsec3Config::default()).unwrap());
        let signer = Arc::new(DnssecSigner::new(registry.clone(), nsec3, DnssecConfig::default()));

        let config = KeySyncConfig {
            peers,
            poll_interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(5),
        };
        let syncer = Arc::new(KeySyncer::new(config, registry.clone(), Some(key_store.clone())).unwrap());

        let api = Arc::new(
            DnssecApi::new(true, registry.clone())
                .with_signer(signer.clone())
                .with_syncer(syncer.clone()),
        );
        let (tx, rx) = oneshot::channel();
        let (addr, _handle) = spawn_dnssec_api("127.0.0.1:0".parse().unwrap(), api, async move {
            let _ = rx.await;
        })
        .unwrap();

        TestNode {
            registry,
            key_store,
            signer,
            syncer,
            url: format!("http://{}", addr),
            shutdown: Some(tx),
        }
    }

    async fn memory(node_id: &str, peers: Vec<String>) -> TestNode {
        TestNode::start(node_id, peers, Arc::new(MemoryKvStore::new())).await
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Syncers are built before peers' ports are known; rebuild one pointing at
/// the given peers
fn syncer_for(node: &TestNode, peers: Vec<String>) -> KeySyncer {
    let config = KeySyncConfig {
        peers,
        poll_interval: Duration::from_secs(3600),
        timeout: Duration::from_secs(5),
    };
    KeySyncer::new(config, node.registry.clone(), Some(node.key_store.clone())).unwrap()
}

fn verify_answers(response: &DnsResponse, key: &KeyPair) {
    let answers = response.answers();
    let mut verified = 0;
    for rrset in RRset::group(answers.to_vec()) {
        if rrset.record_type == DnsRecordType::RRSIG {
            continue;
        }
        let rrsig = answers
            .iter()
            .find(|r| {
                matches!(r.value, DnsRecordValue::RRSIG { type_covered, .. } if type_covered == rrset.record_type)
            })
            .expect("signed rrset");
        let DnsRecordValue::RRSIG { signature, .. } = &rrsig.value else {
            unreachable!()
        };
        let data = rrsig_signing_input(&rrsig.value, &rrset).unwrap();
        key.verify(&data, signature).unwrap();
        verified += 1;
    }
    assert!(verified > 0);
}

#[tokio::test]
async fn test_public_key_propagates_and_validates_signatures() {
    let node_a = TestNode::memory("node-a", Vec::new()).await;
    let node_b = TestNode::memory("node-b", Vec::new()).await;

    let original = node_a
        .registry
        .generate("app.example.com.", DnssecAlgorithm::default())
        .unwrap();

    let syncer = syncer_for(&node_b, vec![node_a.url.clone()]);
    assert_eq!(syncer.sync_now().await, 1);

    let imported = node_b.registry.get("app.example.com.").unwrap();
    assert_eq!(imported.public_key(), original.public_key());
    assert_eq!(imported.key_tag(), original.key_tag());
    assert_eq!(imported.node_id(), "node-a");
    assert!(!imported.can_sign());

    // Node A signs, node B validates with the imported key
    let response = DnsResponse::new(7, Question::new("www.app.example.com.", DnsRecordType::A))
        .with_answer(DnsRecord::a("www.app.example.com.", Ipv4Addr::new(192, 0, 2, 10), 30));
    let signed = node_a.signer.sign(response).unwrap();
    assert!(signed.authenticated_data());
    verify_answers(&signed, &imported);

    // Node B cannot sign for the zone, so its responses pass through unsigned
    let response = DnsResponse::new(8, Question::new("www.app.example.com.", DnsRecordType::A))
        .with_answer(DnsRecord::a("www.app.example.com.", Ipv4Addr::new(192, 0, 2, 11), 30));
    let unsigned = node_b.signer.sign_or_passthrough(response.clone());
    assert_eq!(unsigned, response);
}

#[tokio::test]
async fn test_newest_key_wins_in_both_directions() {
    let node_a = TestNode::memory("node-a", Vec::new()).await;
    let node_b = TestNode::memory("node-b", Vec::new()).await;

    let older = KeyPair::generate("shared.example.", DnssecAlgorithm::default(), "node-a")
        .unwrap()
        .with_created_at(Utc::now() - chrono::Duration::days(2));
    let newer = KeyPair::generate("shared.example.", DnssecAlgorithm::default(), "node-b")
        .unwrap()
        .with_created_at(Utc::now() - chrono::Duration::days(1));
    node_a.registry.set(older.clone()).unwrap();
    node_b.registry.set(newer.clone()).unwrap();

    // Older side pulls: replaced by the newer key, now verify-only
    let a_from_b = syncer_for(&node_a, vec![node_b.url.clone()]);
    assert_eq!(a_from_b.sync_now().await, 1);
    let on_a = node_a.registry.get("shared.example.").unwrap();
    assert_eq!(on_a.public_key(), newer.public_key());
    assert!(!on_a.can_sign());

    // Newer side pulls: keeps its own key and signing ability
    let b_from_a = syncer_for(&node_b, vec![node_a.url.clone()]);
    assert_eq!(b_from_a.sync_now().await, 0);
    let on_b = node_b.registry.get("shared.example.").unwrap();
    assert_eq!(on_b.public_key(), newer.public_key());
    assert!(on_b.can_sign());

    // Converged: further passes change nothing
    assert_eq!(a_from_b.sync_now().await, 0);
    assert_eq!(b_from_a.sync_now().await, 0);
}

#[tokio::test]
async fn test_failed_peer_does_not_block_others() {
    let healthy = TestNode::memory("node-b", Vec::new()).await;
    healthy
        .registry
        .generate("edge.example.", DnssecAlgorithm::EcdsaP384Sha384)
        .unwrap();

    let node = TestNode::memory("node-a", Vec::new()).await;
    let dead_peer = "http://127.0.0.1:1".to_string();
    let syncer = syncer_for(&node, vec![dead_peer.clone(), healthy.url.clone()]);

    assert_eq!(syncer.sync_now().await, 1);
    assert!(node.registry.get("edge.example.").is_some());

    let status = syncer.peer_status();
    assert_eq!(status[0].peer, dead_peer);
    assert!(!status[0].last_success);
    assert!(status[0].last_error.is_some());
    assert_eq!(status[1].peer, healthy.url);
    assert!(status[1].last_success);
    assert_eq!(status[1].keys_imported, 1);
}

#[tokio::test]
async fn test_imported_keys_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("node-a.db");
    let db_path = db_path.to_str().unwrap().to_string();

    let peer = TestNode::memory("node-b", Vec::new()).await;
    let remote = peer
        .registry
        .generate("persist.example.", DnssecAlgorithm::default())
        .unwrap();

    {
        let kv = Arc::new(SqliteKvStore::new(&db_path).unwrap());
        let node = TestNode::start("node-a", Vec::new(), kv).await;
        let syncer = syncer_for(&node, vec![peer.url.clone()]);
        assert_eq!(syncer.sync_now().await, 1);
    }

    // Fresh registry over the same database
    let registry = Arc::new(KeyRegistry::new("node-a"));
    let store = KeyStore::new(Arc::new(SqliteKvStore::new(&db_path).unwrap()), registry.clone());
    assert_eq!(store.load_all().await.unwrap(), 1);

    let restored = registry.get("persist.example.").unwrap();
    assert_eq!(restored.public_key(), remote.public_key());
    assert!(restored.private_key().is_empty());
}

#[tokio::test]
async fn test_sync_triggered_over_http() {
    let source = TestNode::memory("node-b", Vec::new()).await;
    source
        .registry
        .generate("trigger.example.", DnssecAlgorithm::default())
        .unwrap();

    let node = TestNode::memory("node-a", vec![source.url.clone()]).await;
    assert!(node.registry.get("trigger.example.").is_none());

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/v1/dnssec/sync", node.url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["imported"], 1);
    assert_eq!(body["sync"]["peers"][0]["last_success"], true);

    assert!(node.registry.get("trigger.example.").is_some());

    let status: serde_json::Value = client
        .get(format!("{}/api/v1/dnssec/status", node.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["keys"][0]["zone"], "trigger.example.");
    assert_eq!(status["keys"][0]["can_sign"], false);
    assert_eq!(status["sync"]["peers"][0]["peer"], source.url);
}

#[tokio::test]
async fn test_background_loop_runs_initial_pass() {
    let source = TestNode::memory("node-b", Vec::new()).await;
    source
        .registry
        .generate("loop.example.", DnssecAlgorithm::default())
        .unwrap();

    let node = TestNode::memory("node-a", vec![source.url.clone()]).await;
    node.syncer.start().await.unwrap();
    assert!(node.syncer.is_running());
    assert!(node.registry.get("loop.example.").is_some());

    node.syncer.stop().await;
    assert!(!node.syncer.is_running());
}
