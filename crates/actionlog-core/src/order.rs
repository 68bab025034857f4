//! Entry orderings.
//!
//! Both orders iterate newest first:
//!
//! - **created**: descending by `time`, ties broken by descending origin,
//!   then descending sequence, then descending `id.time`. Ids are unique,
//!   so this is a strict total order.
//! - **added**: descending by the store-assigned `added` counter.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::meta::Meta;
use crate::types::ActionId;

/// Which order `get` iterates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Created,
    Added,
}

/// Sort key of an entry in created order.
///
/// The derived `Ord` is ascending (oldest first); stores walk it in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreatedKey {
    pub time: i64,
    pub origin: String,
    pub seq: u64,
    pub id_time: i64,
}

impl CreatedKey {
    pub fn new(time: i64, id: &ActionId) -> Self {
        Self {
            time,
            origin: id.origin.clone(),
            seq: id.seq,
            id_time: id.time,
        }
    }
}

/// Compare two entries in created order: `Less` means `a` comes first,
/// i.e. `a` is newer.
pub fn compare_created(a: &Meta, b: &Meta) -> Ordering {
    b.created_key().cmp(&a.created_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::NewMeta;

    fn meta(id: (i64, &str, u64), time: i64) -> Meta {
        NewMeta::with_id(id).time(time).into_meta(0).unwrap()
    }

    #[test]
    fn test_created_order_tie_breaks() {
        let mut metas = vec![
            meta((1, "a", 0), 1),
            meta((1, "c", 0), 2),
            meta((1, "b", 1), 2),
            meta((3, "b", 0), 2),
        ];
        metas.sort_by(compare_created);

        let ids: Vec<String> = metas.iter().map(|m| m.id.to_string()).collect();
        assert_eq!(ids, vec!["1 c 0", "1 b 1", "3 b 0", "1 a 0"]);
    }

    #[test]
    fn test_created_order_uses_id_time_last() {
        let newer = meta((5, "a", 0), 1);
        let older = meta((4, "a", 0), 1);
        assert_eq!(compare_created(&newer, &older), Ordering::Less);
        assert_eq!(compare_created(&older, &newer), Ordering::Greater);
        assert_eq!(compare_created(&older, &older), Ordering::Equal);
    }

    #[test]
    fn test_order_serde_names() {
        assert_eq!(serde_json::to_string(&Order::Created).unwrap(), r#""created""#);
        assert_eq!(serde_json::to_string(&Order::Added).unwrap(), r#""added""#);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn key() -> impl Strategy<Value = ((i64, String, u64), i64)> {
            ((0i64..4, "[a-c]", 0u64..3), 0i64..4)
        }

        proptest! {
            #[test]
            fn distinct_ids_never_tie(a in key(), b in key()) {
                let (id_a, time_a) = a;
                let (id_b, time_b) = b;
                let same_id = id_a == id_b;
                let a = meta((id_a.0, &id_a.1, id_a.2), time_a);
                let b = meta((id_b.0, &id_b.1, id_b.2), time_b);

                let forward = compare_created(&a, &b);
                prop_assert_eq!(forward, compare_created(&b, &a).reverse());
                if !same_id {
                    prop_assert_ne!(forward, Ordering::Equal);
                }
            }
        }
    }
}
