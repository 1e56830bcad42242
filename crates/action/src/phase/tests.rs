use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

use super::*;

use ActionKind::*;
use Executor::{Backend, Frontend};
use Phase::{
	Execute, ReceiveError, ReceiveRequest, ReceiveResponse, SendError, SendRequest, SendResponse,
};

#[rstest]
#[case(RequestResponse, Initiator::Frontend, Frontend, vec![SendRequest, ReceiveResponse, SendError, ReceiveError])]
#[case(RequestResponse, Initiator::Frontend, Backend, vec![ReceiveRequest, SendResponse, SendError])]
#[case(RequestResponse, Initiator::Backend, Frontend, vec![ReceiveRequest, SendResponse, SendError])]
#[case(
	RequestResponse,
	Initiator::Both,
	Frontend,
	vec![SendRequest, ReceiveResponse, SendError, ReceiveError, ReceiveRequest, SendResponse]
)]
#[case(RemoteNotification, Initiator::Backend, Backend, vec![Phase::Send])]
#[case(RemoteNotification, Initiator::Backend, Frontend, vec![Phase::Receive])]
#[case(RemoteNotification, Initiator::Both, Backend, vec![Phase::Send, Phase::Receive])]
#[case(LocalCall, Initiator::Frontend, Frontend, vec![Execute])]
#[case(LocalCall, Initiator::Frontend, Backend, vec![])]
#[case(LocalCall, Initiator::Both, Backend, vec![Execute])]
#[case(RequestResponse, Initiator::Unrecognized, Frontend, vec![])]
#[case(RemoteNotification, Initiator::Unrecognized, Backend, vec![])]
fn phase_table(#[case] kind: ActionKind, #[case] initiator: Initiator, #[case] role: Executor, #[case] expected: Vec<Phase>) {
	assert_eq!(phases_for(kind, initiator, role), expected);
}

#[test]
fn unknown_initiator_decodes() {
	let initiator: Initiator = serde_json::from_str("\"sidecar\"").unwrap();
	assert_eq!(initiator, Initiator::Unrecognized);
}

#[test]
fn edges_only_leave_happy_path_phases() {
	assert_eq!(next_phases(RequestResponse, SendRequest), &[ReceiveResponse]);
	assert_eq!(next_phases(RequestResponse, ReceiveRequest), &[SendResponse]);
	for phase in [SendError, ReceiveError, ReceiveResponse, SendResponse] {
		assert!(next_phases(RequestResponse, phase).is_empty(), "{phase}");
	}
	assert!(next_phases(LocalCall, Execute).is_empty());
	assert!(next_phases(RemoteNotification, Phase::Send).is_empty());
}

#[test]
fn error_routes() {
	assert_eq!(error_phase(RequestResponse, SendRequest), Some(SendError));
	assert_eq!(error_phase(RequestResponse, ReceiveRequest), Some(SendError));
	assert_eq!(error_phase(RequestResponse, ReceiveResponse), Some(ReceiveError));
	assert_eq!(error_phase(RequestResponse, SendError), None);
	assert_eq!(error_phase(LocalCall, Execute), None);
	assert_eq!(error_phase(RemoteNotification, Phase::Receive), None);
}

fn any_kind() -> impl Strategy<Value = ActionKind> {
	prop_oneof![Just(RequestResponse), Just(RemoteNotification), Just(LocalCall)]
}

fn any_initiator() -> impl Strategy<Value = Initiator> {
	prop_oneof![
		Just(Initiator::Frontend),
		Just(Initiator::Backend),
		Just(Initiator::Both),
		Just(Initiator::Unrecognized),
	]
}

fn any_role() -> impl Strategy<Value = Executor> {
	prop_oneof![Just(Frontend), Just(Backend)]
}

proptest! {
	#[test]
	fn first_phase_is_an_entry_phase(kind in any_kind(), initiator in any_initiator(), role in any_role()) {
		let phases = phases_for(kind, initiator, role);
		if let Some(first) = phases.first() {
			prop_assert!(first.is_entry(), "{first} opens {kind} for {role}");
			prop_assert!(!first.is_error());
		}
		let mut deduped = phases.clone();
		deduped.sort();
		deduped.dedup();
		prop_assert_eq!(deduped.len(), phases.len());
	}
}
