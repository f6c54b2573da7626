mod common;

use common::*;
use gdk_resolver::cancel::CancelToken;
use gdk_resolver::connectivity::ConnectivityGate;
use gdk_resolver::protocol::ChannelMethod;
use gdk_resolver::utils::config::{BackoffConfig, CallMethodPolicy};
use gdk_resolver::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn services(prompts: Arc<ScriptedPrompts>) -> ResolverServices {
    ResolverServices::new(prompts, ConnectivityGate::always_connected())
}

#[tokio::test]
async fn test_scenario_sms_code_then_done() {
    let (call, log) = ScriptedCall::new(vec![
        json!({"status": "request_code", "methods": ["sms"]}),
        json!({"status": "resolve_code", "method": "sms", "attempts_remaining": 2}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("123456"));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts.clone()));

    let result = engine.resolve().await.unwrap();

    assert_eq!(result, json!("ok"));
    assert_eq!(
        mutating_calls(&log),
        vec![
            Recorded::RequestCode("sms".to_string()),
            Recorded::ResolveCode("123456".to_string()),
        ]
    );
    assert!(prompts.method_prompts.lock().unwrap().is_empty());
    let code_prompts = prompts.code_prompts();
    assert_eq!(code_prompts.len(), 1);
    assert_eq!(code_prompts[0].attempts_remaining, Some(2));
    assert!(code_prompts[0].retryable);
    assert_eq!(engine.state(), EngineState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_call_times_out_when_offline() {
    let (call, log) = ScriptedCall::new(vec![json!({"status": "call"})]);
    let connectivity = Arc::new(FlakyConnectivity::new(6));
    let gate = ConnectivityGate::new(connectivity.clone(), BackoffConfig::default());
    let services = ResolverServices::new(Arc::new(ScriptedPrompts::new()), gate);
    let mut engine = TwoFactorCallEngine::from_source(call, services);

    let res = engine.resolve().await;

    assert!(matches!(res, Err(ResolverError::Timeout { attempts: 5 })));
    assert_eq!(connectivity.checks(), 5);
    assert!(!mutating_calls(&log).contains(&Recorded::Call));
    assert_eq!(engine.state(), EngineState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_call_waits_for_reconnect() {
    let (call, log) = ScriptedCall::new(vec![
        json!({"status": "call"}),
        json!({"status": "done", "result": {"txhash": "ff"}}),
    ]);
    let connectivity = Arc::new(FlakyConnectivity::new(2));
    let gate = ConnectivityGate::new(connectivity.clone(), BackoffConfig::fixed(5, Duration::from_secs(3)));
    let services = ResolverServices::new(Arc::new(ScriptedPrompts::new()), gate);
    let mut engine = TwoFactorCallEngine::from_source(call, services);
    let mut events = engine.subscribe();

    let result = engine.resolve().await.unwrap();

    assert_eq!(result["txhash"], "ff");
    assert_eq!(connectivity.checks(), 3);
    assert_eq!(mutating_calls(&log), vec![Recorded::Call]);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&EngineEvent::AwaitingConnectivity));
    assert_eq!(seen.last(), Some(&EngineEvent::Finished { success: true }));
}

#[tokio::test]
async fn test_one_mutating_call_per_status() {
    let (call, log) = ScriptedCall::new(vec![
        json!({"status": "request_code", "methods": ["email"]}),
        json!({"status": "resolve_code", "method": "email"}),
        json!({"status": "call"}),
        json!({"status": "done", "result": {"nested": [1, 2, 3]}}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("000111"));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts));

    let result = engine.resolve().await.unwrap();

    assert_eq!(result, json!({"nested": [1, 2, 3]}));
    let recorded = log.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            Recorded::GetStatus,
            Recorded::RequestCode("email".to_string()),
            Recorded::GetStatus,
            Recorded::ResolveCode("000111".to_string()),
            Recorded::GetStatus,
            Recorded::Call,
            Recorded::GetStatus,
        ]
    );
}

#[tokio::test]
async fn test_multiple_methods_use_chosen_method() {
    let (call, log) = ScriptedCall::new(vec![
        json!({"status": "request_code", "methods": ["email", "sms", "gauth"]}),
        json!({"status": "done", "result": null}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_method(ChannelMethod::AuthenticatorApp));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts.clone()));

    engine.resolve().await.unwrap();

    assert_eq!(mutating_calls(&log), vec![Recorded::RequestCode("gauth".to_string())]);
    assert_eq!(prompts.method_prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_method_choice_never_requests_code() {
    let (call, log) = ScriptedCall::new(vec![json!({"status": "request_code", "methods": ["email", "sms"]})]);
    let mut engine = TwoFactorCallEngine::from_source(call, services(Arc::new(ScriptedPrompts::new())));

    let res = engine.resolve().await;

    assert!(matches!(res, Err(ResolverError::UserCancelled)));
    assert!(mutating_calls(&log).is_empty());
}

#[tokio::test]
async fn test_server_error_status() {
    let (call, _log) = ScriptedCall::new(vec![json!({"status": "error", "error": "id_invalid_twofactor_code"})]);
    let mut engine = TwoFactorCallEngine::from_source(call, services(Arc::new(ScriptedPrompts::new())));

    match engine.resolve().await {
        Err(ResolverError::Server(message)) => assert_eq!(message, "id_invalid_twofactor_code"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(engine.resolve().await, Err(ResolverError::InvalidState(_))));
}

#[tokio::test]
async fn test_channel_switch_is_not_a_cancel() {
    let (call, log) = ScriptedCall::new(vec![json!({"status": "resolve_code", "method": "sms"})]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code_error(ResolverError::ChannelSwitchRequested {
        requested: Some(ChannelMethod::Phone),
    }));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts));

    let res = engine.resolve().await;

    assert!(matches!(
        res,
        Err(ResolverError::ChannelSwitchRequested {
            requested: Some(ChannelMethod::Phone)
        })
    ));
    assert!(mutating_calls(&log).is_empty());
}

#[tokio::test]
async fn test_failed_authenticator_code_is_flagged_on_retry() {
    let (call, _log) = ScriptedCall::new(vec![
        json!({"status": "resolve_code", "method": "gauth", "attempts_remaining": 3}),
        json!({"status": "resolve_code", "method": "gauth", "attempts_remaining": 2}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("111111").with_code("222222"));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts.clone()));

    engine.resolve().await.unwrap();

    let code_prompts = prompts.code_prompts();
    assert_eq!(code_prompts.len(), 2);
    assert!(!code_prompts[0].previous_attempt_failed);
    assert!(code_prompts[1].previous_attempt_failed);
    assert_eq!(code_prompts[1].attempts_remaining, Some(2));
}

#[tokio::test]
async fn test_last_attempt_prompt_is_not_retryable() {
    let (call, _log) = ScriptedCall::new(vec![
        json!({"status": "resolve_code", "method": "email", "attempts_remaining": 0}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("333333"));
    let mut engine = TwoFactorCallEngine::from_source(call, services(prompts.clone()));

    engine.resolve().await.unwrap();

    let code_prompts = prompts.code_prompts();
    assert_eq!(code_prompts[0].attempts_remaining, Some(0));
    assert!(!code_prompts[0].retryable);
}

#[tokio::test]
async fn test_call_upgrade_offered_for_single_sms_method() {
    let (call, _log) = ScriptedCall::new(vec![
        json!({"status": "resolve_code", "method": "sms"}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("123456"));
    let services = services(prompts.clone())
        .with_two_factor_config(Arc::new(StaticTwoFactorConfig(sms_only_config())))
        .with_network("testnet");
    let mut engine = TwoFactorCallEngine::from_source(call, services);

    engine.resolve().await.unwrap();

    let prompt = &prompts.code_prompts()[0];
    assert!(prompt.allow_call_method_upgrade);
    assert_eq!(prompt.network, "testnet");
}

#[tokio::test]
async fn test_call_upgrade_policy_disabled() {
    let (call, _log) = ScriptedCall::new(vec![
        json!({"status": "resolve_code", "method": "sms"}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("123456"));
    let services = services(prompts.clone())
        .with_two_factor_config(Arc::new(StaticTwoFactorConfig(sms_only_config())))
        .with_call_method_policy(CallMethodPolicy::Disabled);
    let mut engine = TwoFactorCallEngine::from_source(call, services);

    engine.resolve().await.unwrap();

    assert!(!prompts.code_prompts()[0].allow_call_method_upgrade);
}

#[tokio::test]
async fn test_config_fetch_failure_only_disables_upgrade() {
    let (call, log) = ScriptedCall::new(vec![
        json!({"status": "resolve_code", "method": "sms"}),
        json!({"status": "done", "result": "ok"}),
    ]);
    let prompts = Arc::new(ScriptedPrompts::new().with_code("123456"));
    let services = services(prompts.clone()).with_two_factor_config(Arc::new(FailingTwoFactorConfig));
    let mut engine = TwoFactorCallEngine::from_source(call, services);

    assert_eq!(engine.resolve().await.unwrap(), json!("ok"));
    assert!(!prompts.code_prompts()[0].allow_call_method_upgrade);
    assert_eq!(mutating_calls(&log), vec![Recorded::ResolveCode("123456".to_string())]);
}

#[tokio::test]
async fn test_bcur_without_channel_is_protocol_error() {
    let (call, _log) = ScriptedCall::new(vec![json!({"status": "resolve_code", "name": "bcur_decode"})]);
    let mut engine = TwoFactorCallEngine::from_source(call, services(Arc::new(ScriptedPrompts::new())));

    assert!(matches!(engine.resolve().await, Err(ResolverError::Protocol { .. })));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_user() {
    let (call, log) = ScriptedCall::new(vec![json!({"status": "resolve_code", "method": "email"})]);
    let services = ResolverServices::new(Arc::new(SilentPrompts), ConnectivityGate::always_connected());
    let cancel = CancelToken::new();
    let mut engine = TwoFactorCallEngine::from_source(call, services).with_cancel_token(cancel.clone());

    let handle = tokio::spawn(async move {
        let res = engine.resolve().await;
        (res, engine.state())
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let (res, state) = handle.await.unwrap();
    assert!(matches!(res, Err(ResolverError::Cancelled)));
    assert_eq!(state, EngineState::Failed);
    assert!(mutating_calls(&log).is_empty());
}

#[tokio::test]
async fn test_unknown_status_is_protocol_error() {
    let (call, _log) = ScriptedCall::new(vec![json!({"status": "teleport"})]);
    let mut engine = TwoFactorCallEngine::from_source(call, services(Arc::new(ScriptedPrompts::new())));

    assert!(matches!(engine.resolve().await, Err(ResolverError::Protocol { .. })));
}
