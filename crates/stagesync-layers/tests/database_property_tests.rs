//! Property test comparing the layer database against a naive model: after
//! any sequence of registrations, every identifier belongs to exactly the
//! last layer that claimed it, and the reverse index agrees.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use stagesync_core::{new_layer, LayerHandle};
use stagesync_layers::LayerDatabase;

fn op_strategy() -> impl Strategy<Value = (usize, String)> {
    (0..4usize, "[a-d]")
}

proptest! {
    #[test]
    fn prop_identifiers_are_exclusively_owned(
        ops in prop::collection::vec(op_strategy(), 0..24)
    ) {
        let db = LayerDatabase::new();
        let layers: Vec<LayerHandle> = (0..4)
            .map(|i| {
                let layer = new_layer(&format!("layer{i}"), "stagesync_text");
                layer.write().dirty = true;
                layer
            })
            .collect();

        // identifier -> index of the last layer that claimed it
        let mut model: BTreeMap<String, usize> = BTreeMap::new();

        for (layer_idx, alias) in ops {
            db.add_layer(&layers[layer_idx], Some(&alias));
            model.insert(format!("layer{layer_idx}"), layer_idx);
            model.insert(alias, layer_idx);
        }

        for (identifier, owner) in &model {
            let found = db.find_layer(identifier).unwrap();
            prop_assert!(
                Arc::ptr_eq(&found, &layers[*owner]),
                "identifier {} must belong to its last claimant",
                identifier
            );
        }

        // The reverse index agrees with the forward one.
        for (idx, layer) in layers.iter().enumerate() {
            for identifier in db.identifiers_for(layer) {
                prop_assert_eq!(model.get(&identifier), Some(&idx));
            }
        }
    }
}
