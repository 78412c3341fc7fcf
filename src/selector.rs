use rand::Rng;

use crate::error::EngineError;
use crate::models::{MessageType, ReminderTemplate};

/// Picks one active template of `message_type` with equal probability.
///
/// No recency or weighting is applied; pass a seeded RNG for reproducible
/// draws.
pub fn select_template<'a, R: Rng + ?Sized>(
    templates: &'a [ReminderTemplate],
    message_type: MessageType,
    rng: &mut R,
) -> Result<&'a ReminderTemplate, EngineError> {
    let candidates: Vec<&ReminderTemplate> = templates
        .iter()
        .filter(|template| template.active && template.message_type == message_type)
        .collect();

    if candidates.is_empty() {
        return Err(EngineError::NoActiveTemplate { message_type });
    }

    Ok(candidates[rng.gen_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelCounts, TemplateContent};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn template(id: &str, message_type: MessageType, active: bool) -> ReminderTemplate {
        ReminderTemplate {
            id: id.to_string(),
            message_type,
            active,
            content: TemplateContent {
                email_subject: "Time to train".to_string(),
                email_body: "Hi {name}, remember to train today.".to_string(),
                sms_body: "{name} - quick reminder to train today!".to_string(),
            },
            send_count: ChannelCounts::default(),
            click_count: ChannelCounts::default(),
        }
    }

    #[test]
    fn draws_are_roughly_uniform() {
        let templates = vec![
            template("a", MessageType::TrainingReminder, true),
            template("b", MessageType::TrainingReminder, true),
            template("c", MessageType::TrainingReminder, true),
            template("d", MessageType::TrainingReminder, true),
            template("inactive", MessageType::TrainingReminder, false),
            template("report", MessageType::StatusReport, true),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for _ in 0..2000 {
            let picked = select_template(&templates, MessageType::TrainingReminder, &mut rng).unwrap();
            *counts.entry(picked.id.clone()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for id in ["a", "b", "c", "d"] {
            let count = counts[id];
            assert!((400..=600).contains(&count), "{id} drawn {count} times");
        }
    }

    #[test]
    fn only_active_templates_of_requested_type_are_drawn() {
        let templates = vec![
            template("off", MessageType::TrainingReminder, false),
            template("weekly", MessageType::StatusReport, true),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let picked = select_template(&templates, MessageType::StatusReport, &mut rng).unwrap();
        assert_eq!(picked.id, "weekly");
    }

    #[test]
    fn no_match_is_an_error() {
        let templates = vec![template("off", MessageType::TrainingReminder, false)];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let err = select_template(&templates, MessageType::TrainingReminder, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoActiveTemplate {
                message_type: MessageType::TrainingReminder
            }
        ));
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let templates: Vec<_> = (0..5)
            .map(|i| template(&format!("t{i}"), MessageType::TrainingReminder, true))
            .collect();
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..20)
                .map(|_| {
                    select_template(&templates, MessageType::TrainingReminder, &mut rng)
                        .unwrap()
                        .id
                        .clone()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }
}
