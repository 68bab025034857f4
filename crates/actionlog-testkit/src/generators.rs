//! Proptest generators for property-based testing.
//!
//! Domains are kept small on purpose so generated logs contain equal
//! times, shared origins and duplicate ids.

use proptest::prelude::*;

use actionlog_core::{Action, ActionId, NewMeta};

/// Generate a short origin id.
pub fn origin() -> impl Strategy<Value = String> {
    "[a-d]{1,2}".prop_map(String::from)
}

/// Generate an action id from a narrow range.
pub fn action_id() -> impl Strategy<Value = ActionId> {
    (0i64..6, origin(), 0u64..4).prop_map(|(time, origin, seq)| ActionId::new(time, origin, seq))
}

/// Generate an action type.
pub fn action_kind() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_map(String::from)
}

/// Generate a reason set drawn from three names.
pub fn reasons() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop_oneof![Just("a"), Just("b"), Just("c")], 0..3)
        .prop_map(|reasons| reasons.into_iter().map(String::from).collect())
}

/// Parameters for generating one entry.
#[derive(Debug, Clone)]
pub struct EntryParams {
    pub kind: String,
    pub id: ActionId,
    /// `None` lets the store derive the time from the id.
    pub time: Option<i64>,
    pub reasons: Vec<String>,
}

impl Arbitrary for EntryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            action_kind(),
            action_id(),
            prop::option::of(0i64..6),
            reasons(),
        )
            .prop_map(|(kind, id, time, reasons)| EntryParams {
                kind,
                id,
                time,
                reasons,
            })
            .boxed()
    }
}

/// Build the `add` arguments described by `params`.
pub fn entry_from_params(params: &EntryParams) -> (Action, NewMeta) {
    let mut meta = NewMeta::with_id(params.id.clone()).reasons(params.reasons.clone());
    if let Some(time) = params.time {
        meta = meta.time(time);
    }
    (Action::new(params.kind.clone()), meta)
}

/// Generate up to `max` entries.
pub fn entries(max: usize) -> impl Strategy<Value = Vec<EntryParams>> {
    prop::collection::vec(any::<EntryParams>(), 0..=max)
}
