use proptest::prelude::*;
use sdk::errors::{AssertionFailure, ConvocheckErrorExt, EngineError};
use sdk::types::{Convo, ConvoStep, Sender, StepRef};

// Every error must expose a usable hint regardless of the embedded message.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Compile(error_str.clone()),
            EngineError::Connector(error_str.clone()),
            EngineError::Security(error_str.clone()),
            EngineError::Configuration {
                step_tag: "Line 1".to_string(),
                source: "PAUSE".to_string(),
                message: error_str.clone(),
            },
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
        }
    }
}

// Composite message joins each cause with ",\n" and preserves cause order.
proptest! {
    #[test]
    fn test_composite_cause_order(
        messages in prop::collection::vec("[a-z ]{1,20}", 1..6)
    ) {
        let causes: Vec<AssertionFailure> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| AssertionFailure::new("TEXT", format!("Line {}", i + 1), false, m.clone()))
            .collect();

        let err = EngineError::composite(causes);
        let rendered = err.to_string();

        prop_assert_eq!(rendered.matches(",\n").count(), messages.len() - 1);
        prop_assert_eq!(err.assertion_causes().len(), messages.len());
        for (i, m) in messages.iter().enumerate() {
            prop_assert_eq!(&err.assertion_causes()[i].message, m);
        }
    }
}

// Canonical model round-trips through JSON without losing step content.
proptest! {
    #[test]
    fn test_convo_serialization_roundtrip(
        name in "[a-zA-Z0-9_-]{1,20}",
        texts in prop::collection::vec("[a-zA-Z0-9 ?!.]{1,40}", 1..8),
        asserter_name in "[A-Z_]{2,20}",
        args in prop::collection::vec("[a-zA-Z0-9]{1,10}", 0..4)
    ) {
        let steps: Vec<ConvoStep> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let sender = if i % 2 == 0 { Sender::Me } else { Sender::Bot };
                let mut step = ConvoStep::new(sender, format!("Line {}", i + 1));
                step.message_text = Some(text.clone());
                if sender == Sender::Bot {
                    step.asserters.push(StepRef::new(asserter_name.clone(), args.clone()));
                }
                step
            })
            .collect();

        let convo = Convo::new(name.clone(), steps);
        let serialized = serde_json::to_string(&convo).unwrap();
        let restored: Convo = serde_json::from_str(&serialized).unwrap();

        prop_assert_eq!(restored.header.name, name);
        prop_assert_eq!(restored.conversation.len(), texts.len());
        for (step, text) in restored.conversation.iter().zip(texts.iter()) {
            prop_assert_eq!(step.message_text.as_deref(), Some(text.as_str()));
        }
    }
}
