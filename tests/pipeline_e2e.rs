use std::fs::File;
use std::io::{BufReader, Write};
use std::time::Duration;

use serde_json::Value;

use skyfilter::{AppConfig, JsonlSource, Pipeline};

const WAIT: Duration = Duration::from_secs(5);

const CONFIG: &str = r#"{
    "bskyServer": "https://bsky.example",
    "workers": 4,
    "rules": [
        {"name": "rust posts", "collections": ["app.bsky.feed.post"], "textRegexes": ["(?i)\\brust\\b"]},
        {"name": "likes of me", "collections": ["app.bsky.feed.like"], "targetUsers": ["did:plc:me"]},
        {"name": "links", "urlRegexes": ["^https://github\\.com/"]},
        {"name": "replies to me", "targetUsers": ["did:plc:me"], "isReply": true}
    ]
}"#;

fn post(did: &str, text: &str, extra: &str) -> String {
    format!(
        r#"{{"did":"{did}","time_us":1,"kind":"commit","commit":{{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{{"$type":"app.bsky.feed.post","text":"{text}","createdAt":"2024-01-01T00:00:00Z"{extra}}}}}}}"#
    )
}

fn like(did: &str, subject_did: &str) -> String {
    format!(
        r#"{{"did":"{did}","time_us":2,"kind":"commit","commit":{{"rev":"r","operation":"create","collection":"app.bsky.feed.like","rkey":"k","record":{{"subject":{{"uri":"at://{subject_did}/app.bsky.feed.post/1","cid":"c"}}}}}}}}"#
    )
}

fn repost(did: &str) -> String {
    format!(
        r#"{{"did":"{did}","time_us":3,"kind":"commit","commit":{{"rev":"r","operation":"create","collection":"app.bsky.feed.repost","rkey":"k","record":{{"subject":{{"uri":"at://did:plc:me/app.bsky.feed.post/1","cid":"c"}}}}}}}}"#
    )
}

fn collect(sub: &skyfilter::Subscription) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(Some(frame)) = sub.recv_timeout(Duration::from_millis(500)) {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

fn matched(envelope: &Value) -> Vec<String> {
    envelope["matchedRules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn file_input_reaches_every_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("firehose.jsonl");
    let mut file = File::create(&path).unwrap();
    let lines = [
        post("did:plc:a", "I love Rust", ""),
        post("did:plc:b", "nothing to see", ""),
        like("did:plc:c", "did:plc:me"),
        like("did:plc:c", "did:plc:other"),
        "{broken".to_string(),
        post(
            "did:plc:d",
            "check this",
            r#","embed":{"$type":"app.bsky.embed.external","external":{"uri":"https://github.com/x/y","title":"y"}}"#,
        ),
        post(
            "did:plc:e",
            "rust reply",
            r#","reply":{"parent":{"uri":"at://did:plc:me/app.bsky.feed.post/9","cid":"c"},"root":{"uri":"at://did:plc:me/app.bsky.feed.post/9","cid":"c"}}"#,
        ),
        repost("did:plc:f"),
    ];
    for line in &lines {
        writeln!(file, "{line}").unwrap();
    }
    drop(file);

    let config = AppConfig::from_json(CONFIG).unwrap();
    let mut pipeline = Pipeline::start(&config).unwrap();
    let first = pipeline.hub().subscribe().unwrap();
    let second = pipeline.hub().subscribe().unwrap();

    let inbound = pipeline.inbound().unwrap();
    let source = JsonlSource::new(
        BufReader::new(File::open(&path).unwrap()),
        pipeline.plan().clone(),
    );
    let stats = source.run(&inbound).unwrap();
    drop(inbound);
    assert_eq!(stats.malformed, 1);
    // Reposts are outside the subscribed collections.
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.forwarded, 6);

    let snapshot = pipeline.shutdown();
    assert_eq!(snapshot.processed, 6);
    assert_eq!(snapshot.matched, 4);

    let mut a = collect(&first);
    let mut b = collect(&second);
    assert_eq!(a.len(), 4);
    assert_eq!(a.len(), b.len());

    // Workers run in parallel, so order across events is not fixed.
    let key = |v: &Value| v["event"]["did"].as_str().unwrap().to_string();
    a.sort_by_key(key);
    b.sort_by_key(key);
    assert_eq!(a, b);

    assert_eq!(key(&a[0]), "did:plc:a");
    assert_eq!(matched(&a[0]), ["rust posts"]);
    assert_eq!(key(&a[1]), "did:plc:c");
    assert_eq!(matched(&a[1]), ["likes of me"]);
    assert_eq!(key(&a[2]), "did:plc:d");
    assert_eq!(matched(&a[2]), ["links"]);
    assert_eq!(key(&a[3]), "did:plc:e");
    assert_eq!(matched(&a[3]), ["rust posts", "replies to me"]);

    // The raw upstream record is forwarded verbatim.
    assert_eq!(a[0]["event"]["commit"]["record"]["text"], "I love Rust");

    let counters = pipeline.counters().snapshot();
    assert!(counters.contains(&("rust posts".to_string(), 2)));
    assert!(counters.contains(&("likes of me".to_string(), 1)));
    assert!(counters.contains(&("links".to_string(), 1)));
    assert!(counters.contains(&("replies to me".to_string(), 1)));
}

#[test]
fn catalog_exposes_rule_names_and_public_config() {
    let config = AppConfig::from_json(CONFIG).unwrap();
    let pipeline = Pipeline::start(&config).unwrap();
    let catalog = pipeline.catalog();
    assert_eq!(
        catalog.rule_names(),
        ["rust posts", "likes of me", "links", "replies to me"].map(String::from)
    );
    assert_eq!(catalog.public_config().bsky_server, "https://bsky.example");
    let query = pipeline.plan().jetstream_query(None);
    assert_eq!(
        query,
        "wantedCollections=app.bsky.feed.like&wantedCollections=app.bsky.feed.post"
    );
}

#[test]
fn unsubscribed_client_stops_receiving() {
    let config = AppConfig::from_json(r#"{"workers": 1}"#).unwrap();
    let mut pipeline = Pipeline::start(&config).unwrap();
    let stays = pipeline.hub().subscribe().unwrap();
    let leaves = pipeline.hub().subscribe().unwrap();
    leaves.unsubscribe();

    let inbound = pipeline.inbound().unwrap();
    inbound
        .send(skyfilter::Event::post("did:plc:a", skyfilter::Post::new("hi")))
        .unwrap();
    drop(inbound);

    let frame = stays.recv_timeout(WAIT).unwrap().unwrap();
    let value: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(matched(&value), ["All events"]);

    pipeline.shutdown();
    assert!(leaves.recv().is_err());
}
