use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use starstruck::gateway::openrouter::OpenRouterAdapter;
use starstruck::gateway::{GatewayConfig, ModelSettings, NoopUsageSink, ProviderGateway};
use starstruck::model::{ChatHistory, Party, PersonProfile};
use starstruck::pipeline::{Phase, Pipeline, PipelineInput, Stage};
use starstruck::stages::{self, ChatContext};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const COACHING_REPLY: &str = "I cannot produce dating advice about real people.";
const CHAT_REPLY: &str =
    "I can't stress enough how much Bob loves Metallica, so ask about their last show.";

/// Answers each stage by the instruction it was sent.
struct StageResponder;

impl Respond for StageResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let system = body["messages"][0]["content"].as_str().unwrap_or("");

        let content = if system.contains("personality analyst") {
            let name = if system.contains("Alice's digital footprint") {
                "Alice"
            } else {
                "Bob"
            };
            json!({
                "public": {
                    "vibe": format!("{name} keeps late hours."),
                    "tags": ["music", "late nights"],
                    "schedule_pattern": "night_owl"
                },
                "private": {
                    "summary": format!("{name} is a night owl."),
                    "traits": ["curious"],
                    "interests": ["Metallica"],
                    "deep_cuts": []
                }
            })
            .to_string()
        } else if system.contains("compatibility analyst") {
            json!({
                "shared": [{"signal": "night owls", "detail": "both up past 1am", "source": "github"}],
                "complementary": [],
                "tension_points": [],
                "citations": ["Alice: 1am commits", "Bob: 1am commits", "Bob: Metallica"],
                "venue_appropriate": false
            })
            .to_string()
        } else if system.contains("dating coach and conversational strategist") {
            COACHING_REPLY.to_string()
        } else {
            CHAT_REPLY.to_string()
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20 }
        }))
    }
}

async fn gateway() -> (MockServer, Arc<ProviderGateway<NoopUsageSink>>) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(StageResponder)
        .mount(&server)
        .await;

    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
            .unwrap();
    let gateway = ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        ModelSettings::default(),
        GatewayConfig::default(),
    );
    (server, Arc::new(gateway))
}

fn input() -> PipelineInput {
    PipelineInput::new(
        PersonProfile::new("Alice").with_source("github", json!({"commit_hours": [1, 2]})),
        PersonProfile::new("Bob").with_source("spotify", json!({"top_artists": ["Metallica"]})),
    )
}

#[tokio::test]
async fn declining_coaching_text_degrades_instead_of_failing_the_run() {
    let (_server, gateway) = gateway().await;
    let pipeline = Pipeline::new(gateway);

    let state = pipeline.run(input()).await.unwrap();

    assert_eq!(state.phase, Phase::Done);
    for party in [Party::A, Party::B] {
        assert!(state.briefing(party).unwrap().is_empty());
    }
    assert_eq!(state.briefing(Party::A).unwrap().target, "Alice");
    assert!(state.is_degraded(Stage::Coaching));
    assert_eq!(state.degraded.len(), 2);
}

#[tokio::test]
async fn chat_reply_starting_with_i_cant_is_returned() {
    let (server, gateway) = gateway().await;
    let state = Pipeline::new(gateway.clone()).run(input()).await.unwrap();

    let ctx = ChatContext::new(
        state.dossier(Party::A).unwrap(),
        state.dossier(Party::B).unwrap(),
        state.cross_reference.as_ref().unwrap(),
    );
    let history = ChatHistory::new();
    let reply = stages::coach_chat(gateway.as_ref(), &ctx, history.turns(), "What should I ask?")
        .await
        .unwrap();

    assert_eq!(reply, CHAT_REPLY);
    // Two dossiers, one cross-reference, two briefings, one chat turn.
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}
