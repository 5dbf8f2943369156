mod support;

use agent_chat::{
    derive_session_key, AgentRegistration, Author, ConnectionPhase, Conversation, SendRejection,
    ServerReachability, SEND_TIMEOUT_NOTICE,
};
use chat_contract::{
    BroadcastMessage, ChatEvent, CompletionSignal, ControlMessage, CLIENT_SOURCE, SENTINEL_ID,
};
use chat_contract_mock::history_message;
use pretty_assertions::assert_eq;
use support::{connected, HostCall, RecordingHost, AGENT, USER};

fn agent_reply(id: &str, text: &str) -> ChatEvent {
    ChatEvent::MessageBroadcast(
        BroadcastMessage::new(AGENT, text)
            .with_id(id)
            .with_channel(SENTINEL_ID),
    )
}

#[test]
fn startup_probes_then_registers_connects_and_joins_session() {
    let mut host = RecordingHost::new();
    let mut conversation = Conversation::new(AGENT, SENTINEL_ID);

    conversation.start(USER.to_string(), None, &mut host);
    assert_eq!(host.take_calls(), vec![HostCall::CheckReachability]);
    assert_eq!(conversation.reachability, ServerReachability::Checking);
    assert_eq!(conversation.connection, ConnectionPhase::Connecting);

    conversation.on_reachability(true, &mut host);
    assert_eq!(
        host.take_calls(),
        vec![
            HostCall::RegisterAgent {
                agent_id: AGENT.to_string()
            },
            HostCall::StartConnect {
                user_id: USER.to_string(),
                server_id: SENTINEL_ID.to_string()
            },
        ]
    );

    conversation.on_registration(Ok(()), &mut host);
    assert_eq!(conversation.registration, AgentRegistration::Ready);

    conversation.on_connected(&mut host);
    let session_key = derive_session_key(USER, None, AGENT);
    let binding = conversation
        .active_binding()
        .cloned()
        .expect("session should be bound");
    assert_eq!(binding.session_key, session_key);
    assert_eq!(binding.generation, 1);
    assert_eq!(
        host.take_calls(),
        vec![
            HostCall::Attach(binding),
            HostCall::LoadHistory {
                agent_id: AGENT.to_string(),
                session_key,
            },
        ]
    );
    assert!(conversation.is_ready());
}

#[test]
fn offline_probe_adds_one_notice_and_keeps_connection_idle() {
    let mut host = RecordingHost::new();
    let mut conversation = Conversation::new(AGENT, SENTINEL_ID);
    conversation.start(USER.to_string(), None, &mut host);

    conversation.on_reachability(false, &mut host);
    conversation.on_reachability(false, &mut host);

    assert_eq!(conversation.reachability, ServerReachability::Offline);
    assert_eq!(conversation.notices.len(), 1);
    assert_eq!(host.count(|call| matches!(call, HostCall::StartConnect { .. })), 0);
}

#[test]
fn registration_failure_is_reported_without_blocking_sends() {
    let (mut conversation, mut host) = connected(None);
    conversation.on_registration(Err("HTTP 500".to_string()), &mut host);
    assert_eq!(conversation.registration, AgentRegistration::Error);

    assert!(conversation.send_message("still works", &mut host).is_ok());
}

#[test]
fn send_builds_sentinel_payload_and_locks_input() {
    let (mut conversation, mut host) = connected(None);
    host.take_calls();

    let send_id = conversation
        .send_message("  hello agent  ", &mut host)
        .expect("send should be accepted");

    let outbound = host.transmitted[0].clone();
    assert_eq!(outbound.text, "hello agent");
    assert_eq!(outbound.sender_id, USER);
    assert_eq!(outbound.channel_id, SENTINEL_ID);
    assert_eq!(outbound.server_id, SENTINEL_ID);
    assert_eq!(outbound.room_id, derive_session_key(USER, None, AGENT));
    assert_eq!(outbound.source, CLIENT_SOURCE);
    assert_eq!(
        host.take_calls(),
        vec![
            HostCall::Transmit {
                message_id: outbound.message_id.clone()
            },
            HostCall::ArmTimeout(send_id),
        ]
    );

    assert!(conversation.agent_thinking);
    assert!(conversation.input_disabled());
    assert_eq!(conversation.pending_send(), Some(send_id));
    let local = conversation.messages.last().expect("local message");
    assert_eq!(local.id, outbound.message_id);
    assert_eq!(local.author, Author::Local);
    assert_eq!(local.display_name, "You");
}

#[test]
fn send_preconditions_reject_without_side_effects() {
    let mut host = RecordingHost::new();
    let mut conversation = Conversation::new(AGENT, SENTINEL_ID);
    assert_eq!(
        conversation.send_message("hi", &mut host),
        Err(SendRejection::NoIdentity)
    );

    conversation.start(USER.to_string(), None, &mut host);
    assert_eq!(
        conversation.send_message("hi", &mut host),
        Err(SendRejection::NotReady)
    );

    let (mut conversation, mut host) = connected(None);
    assert_eq!(
        conversation.send_message("   ", &mut host),
        Err(SendRejection::EmptyText)
    );
    conversation
        .send_message("first", &mut host)
        .expect("first send accepted");
    assert_eq!(
        conversation.send_message("second", &mut host),
        Err(SendRejection::InputDisabled)
    );
    assert_eq!(host.transmitted.len(), 1);
    assert_eq!(conversation.messages.len(), 1);
}

#[test]
fn transmit_failure_leaves_input_enabled_and_posts_notice() {
    let (mut conversation, mut host) = connected(None);
    host.transmit_error = Some("live channel is not connected".to_string());

    conversation.on_submit("hello", &mut host);

    assert!(conversation.messages.is_empty());
    assert!(!conversation.input_disabled());
    assert!(!conversation.agent_thinking);
    assert_eq!(
        conversation.notices.last().map(|notice| notice.text.as_str()),
        Some("Message not sent: live channel is not connected")
    );
}

#[test]
fn agent_reply_clears_thinking_and_cancels_timer() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    let send_id = conversation.send_message("hi", &mut host).expect("send");

    conversation.on_channel_event(generation, agent_reply("r-1", "hello"), &mut host);

    assert!(!conversation.agent_thinking);
    assert!(!conversation.send_lock());
    assert_eq!(conversation.pending_send(), None);
    assert!(host.calls.contains(&HostCall::CancelTimeout(send_id)));
    let reply = conversation.messages.last().expect("reply");
    assert_eq!(reply.author, Author::Agent);
    assert_eq!(reply.display_name, "Agent");
}

#[test]
fn self_echo_and_duplicate_ids_are_dropped() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    conversation.send_message("hi", &mut host).expect("send");
    let local_id = conversation.messages[0].id.clone();

    conversation.on_channel_event(
        generation,
        ChatEvent::MessageBroadcast(BroadcastMessage::new(USER, "hi").with_id("echo")),
        &mut host,
    );
    conversation.on_channel_event(
        generation,
        ChatEvent::MessageBroadcast(BroadcastMessage::new("someone", "hi").with_id(local_id)),
        &mut host,
    );
    conversation.on_channel_event(generation, agent_reply("r-1", "one"), &mut host);
    conversation.on_channel_event(generation, agent_reply("r-1", "again"), &mut host);

    let texts: Vec<_> = conversation
        .messages
        .iter()
        .map(|message| message.text.as_str())
        .collect();
    assert_eq!(texts, vec!["hi", "one"]);
}

#[test]
fn participant_messages_do_not_release_the_send_lock() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    conversation.send_message("hi", &mut host).expect("send");

    conversation.on_channel_event(
        generation,
        ChatEvent::MessageBroadcast(
            BroadcastMessage::new("peer", "me too")
                .with_id("p-1")
                .with_sender_name("Pat"),
        ),
        &mut host,
    );

    assert!(conversation.agent_thinking);
    assert!(conversation.send_lock());
    let message = conversation.messages.last().expect("participant message");
    assert_eq!(message.author, Author::Participant);
    assert_eq!(message.display_name, "Pat");
}

#[test]
fn completion_releases_every_lock_and_is_idempotent() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    conversation.send_message("hi", &mut host).expect("send");
    conversation.on_channel_event(
        generation,
        ChatEvent::Control(ControlMessage::disable_input()),
        &mut host,
    );
    assert!(conversation.control_lock());

    conversation.on_channel_event(
        generation,
        ChatEvent::Complete(CompletionSignal::default()),
        &mut host,
    );
    let after_first = conversation.clone();
    conversation.on_channel_event(
        generation,
        ChatEvent::Complete(CompletionSignal::default()),
        &mut host,
    );

    assert!(!conversation.input_disabled());
    assert!(!conversation.agent_thinking);
    assert_eq!(conversation, after_first);
}

#[test]
fn disable_input_during_a_send_keeps_a_timeout_armed() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    let send_id = conversation.send_message("hi", &mut host).expect("send");
    host.take_calls();

    conversation.on_channel_event(
        generation,
        ChatEvent::Control(ControlMessage::disable_input()),
        &mut host,
    );
    let backstop = conversation.pending_send().expect("timeout still armed");
    assert_eq!(
        host.take_calls(),
        vec![
            HostCall::CancelTimeout(send_id),
            HostCall::ArmTimeout(backstop)
        ]
    );
    assert!(conversation.agent_thinking);
    assert!(conversation.input_disabled());

    conversation.on_send_timeout(backstop, &mut host);

    assert!(!conversation.agent_thinking);
    assert!(!conversation.input_disabled());
    assert!(host.calls.contains(&HostCall::CancelTimeout(backstop)));
    assert_eq!(
        conversation.notices.last().map(|notice| notice.text.as_str()),
        Some(SEND_TIMEOUT_NOTICE)
    );
}

#[test]
fn unknown_control_actions_change_nothing() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    conversation.send_message("hi", &mut host).expect("send");
    let before = conversation.clone();

    conversation.on_channel_event(
        generation,
        ChatEvent::Control(ControlMessage::new("reboot")),
        &mut host,
    );

    assert_eq!(conversation, before);
}

#[test]
fn send_timeout_releases_locks_with_a_local_notice() {
    let (mut conversation, mut host) = connected(None);
    let send_id = conversation.send_message("hi", &mut host).expect("send");

    conversation.on_send_timeout(send_id, &mut host);

    assert!(!conversation.agent_thinking);
    assert!(!conversation.input_disabled());
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(
        conversation.notices.last().map(|notice| notice.text.as_str()),
        Some(SEND_TIMEOUT_NOTICE)
    );

    let notices = conversation.notices.len();
    conversation.on_send_timeout(send_id, &mut host);
    assert_eq!(conversation.notices.len(), notices);
}

#[test]
fn history_replaces_transcript_and_keeps_live_messages() {
    let (mut conversation, mut host) = connected(None);
    let generation = conversation.generation();
    let session_key = conversation.session_key().expect("session").to_string();

    conversation.on_channel_event(generation, agent_reply("live-1", "live"), &mut host);
    conversation.on_channel_event(generation, agent_reply("h-2", "dup"), &mut host);

    conversation.on_history_loaded(
        &session_key,
        Ok(vec![
            history_message("h-1", USER, "earlier question", 1),
            history_message("h-2", AGENT, "earlier answer", 2),
            history_message("h-2", AGENT, "repeated", 2),
        ]),
        &mut host,
    );

    let ids: Vec<_> = conversation
        .messages
        .iter()
        .map(|message| (message.id.as_str(), message.author))
        .collect();
    assert_eq!(
        ids,
        vec![
            ("h-1", Author::Local),
            ("h-2", Author::Agent),
            ("live-1", Author::Agent),
        ]
    );
    assert_eq!(conversation.messages[1].text, "earlier answer");
}

#[test]
fn history_failure_keeps_the_transcript() {
    let (mut conversation, mut host) = connected(None);
    let session_key = conversation.session_key().expect("session").to_string();
    conversation.send_message("hi", &mut host).expect("send");

    conversation.on_history_loaded(&session_key, Err("HTTP 500".to_string()), &mut host);

    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.notices.len(), 1);
}

#[test]
fn history_loads_once_per_session_across_reconnects() {
    let (mut conversation, mut host) = connected(None);

    conversation.on_connection_lost(&mut host);
    assert_eq!(conversation.connection, ConnectionPhase::Connecting);
    assert!(conversation.active_binding().is_none());
    conversation.on_connected(&mut host);

    assert_eq!(
        host.count(|call| matches!(call, HostCall::LoadHistory { .. })),
        1
    );
    assert_eq!(host.count(|call| matches!(call, HostCall::Attach(_))), 2);
    assert_eq!(conversation.generation(), 2);
}

#[test]
fn connect_failure_enters_error_and_retry_redials() {
    let mut host = RecordingHost::new();
    let mut conversation = Conversation::new(AGENT, SENTINEL_ID);
    conversation.start(USER.to_string(), None, &mut host);
    conversation.on_reachability(true, &mut host);
    conversation.on_connect_failed("no live channel after 6 attempts", &mut host);
    assert_eq!(conversation.connection, ConnectionPhase::Error);
    host.take_calls();

    conversation.on_submit("/retry", &mut host);
    assert_eq!(conversation.reachability, ServerReachability::Checking);
    assert_eq!(host.take_calls(), vec![HostCall::CheckReachability]);

    conversation.on_reachability(true, &mut host);
    assert_eq!(conversation.connection, ConnectionPhase::Connecting);
    assert!(host
        .take_calls()
        .contains(&HostCall::StartConnect {
            user_id: USER.to_string(),
            server_id: SENTINEL_ID.to_string(),
        }));
}

#[test]
fn refresh_while_connected_does_not_redial() {
    let (mut conversation, mut host) = connected(None);
    host.take_calls();

    conversation.refresh(&mut host);
    conversation.on_reachability(true, &mut host);

    assert_eq!(host.take_calls(), vec![HostCall::CheckReachability]);
    assert!(conversation.is_ready());
}

#[test]
fn slash_commands_are_handled_locally() {
    let (mut conversation, mut host) = connected(None);
    conversation.send_message("hi", &mut host).expect("send");
    let sent = host.transmitted.len();

    conversation.on_submit("/help", &mut host);
    conversation.on_submit("/bogus", &mut host);
    conversation.on_submit("/clear", &mut host);

    assert_eq!(host.transmitted.len(), sent);
    assert!(conversation.messages.is_empty());
    let notices: Vec<_> = conversation
        .notices
        .iter()
        .map(|notice| notice.text.as_str())
        .collect();
    assert_eq!(
        notices,
        vec![
            agent_chat::HELP_TEXT,
            "Unknown command: /bogus",
            "Transcript cleared"
        ]
    );
}

#[test]
fn quit_tears_down_membership_and_stops() {
    let (mut conversation, mut host) = connected(None);
    let binding = conversation.active_binding().cloned().expect("binding");
    let send_id = conversation.send_message("hi", &mut host).expect("send");
    host.take_calls();

    conversation.on_submit("/quit", &mut host);

    assert!(conversation.should_exit);
    assert_eq!(
        host.take_calls(),
        vec![
            HostCall::Detach(binding),
            HostCall::CancelTimeout(send_id),
            HostCall::Stop
        ]
    );
}
