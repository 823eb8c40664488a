//! Batch planning: group events by impact key and order groups by rule priority.

use std::collections::HashMap;
use std::fmt;

use super::events::{EventType, ImpactKey, InvalidationEvent};
use super::rules::RuleSet;

/// Events sharing one impact key.
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub impact_key: ImpactKey,
    /// Lowest rule priority among the group's events.
    pub priority: u32,
    pub events: Vec<InvalidationEvent>,
}

impl EventGroup {
    /// Event type of the first event; selects the rule applied to the group.
    pub fn event_type(&self) -> Option<EventType> {
        self.events.first().map(InvalidationEvent::event_type)
    }
}

/// Ordered groups for one batch.
#[derive(Debug, Default)]
pub struct InvalidationPlan {
    pub groups: Vec<EventGroup>,
}

impl InvalidationPlan {
    /// Group `events` by impact key, keeping arrival order inside each group and
    /// first-seen order between groups of equal priority.
    pub fn from_events(events: &[InvalidationEvent], rules: &RuleSet) -> Self {
        let mut index: HashMap<ImpactKey, usize> = HashMap::new();
        let mut groups: Vec<EventGroup> = Vec::new();

        for event in events {
            let impact_key = event.kind.impact_key();
            let priority = rules.priority(event.event_type());
            match index.get(&impact_key) {
                Some(&position) => {
                    let group = &mut groups[position];
                    group.priority = group.priority.min(priority);
                    group.events.push(event.clone());
                }
                None => {
                    index.insert(impact_key.clone(), groups.len());
                    groups.push(EventGroup {
                        impact_key,
                        priority,
                        events: vec![event.clone()],
                    });
                }
            }
        }

        groups.sort_by_key(|group| group.priority);
        Self { groups }
    }

    pub fn event_count(&self) -> usize {
        self.groups.iter().map(|group| group.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvalidationPlan {{ groups: [")?;
        for (position, group) in self.groups.iter().enumerate() {
            if position > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{} (p{}, {} events)",
                group.impact_key,
                group.priority,
                group.events.len()
            )?;
        }
        write!(f, "] }}")
    }
}
