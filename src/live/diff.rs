//! Sectioning and change computation for live queries.

use super::types::{IndexPath, ObjectChange, ResultChanges, Section, SectionChange};
use crate::types::{ManagedObject, ObjectId};
use std::collections::HashMap;

/// Group ordered results into sections.
///
/// Sections appear in the order their key value is first seen. Without a key
/// there is exactly one section named `""`, even when it is empty. A null key
/// value and an empty text value both display as `""`, so they share one
/// section.
pub(crate) fn partition(objects: Vec<ManagedObject>, section_key: Option<&str>) -> Vec<Section> {
    let key = match section_key {
        Some(key) => key,
        None => {
            return vec![Section {
                name: String::new(),
                objects,
            }]
        }
    };

    let mut sections: Vec<Section> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for object in objects {
        let name = object.get(key).to_string();
        match positions.get(&name) {
            Some(&index) => sections[index].objects.push(object),
            None => {
                positions.insert(name.clone(), sections.len());
                sections.push(Section {
                    name,
                    objects: vec![object],
                });
            }
        }
    }

    sections
}

struct Located<'a> {
    path: IndexPath,
    section: &'a str,
    object: &'a ManagedObject,
}

fn locate(sections: &[Section]) -> HashMap<ObjectId, Located<'_>> {
    let mut located = HashMap::new();
    for (s, section) in sections.iter().enumerate() {
        for (row, object) in section.objects.iter().enumerate() {
            located.insert(
                object.id(),
                Located {
                    path: IndexPath::new(s, row),
                    section: &section.name,
                    object,
                },
            );
        }
    }
    located
}

/// Compute what changed between two sectioned states.
///
/// A section present in both states carries its objects when it moves, so
/// an object only moves on its own when it changes section or leaves the
/// longest run of rows that kept their order inside its section.
pub(crate) fn diff(old: &[Section], new: &[Section]) -> ResultChanges {
    let mut changes = ResultChanges::default();

    let old_index: HashMap<&str, usize> = old
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let new_index: HashMap<&str, usize> = new
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    for (index, section) in old.iter().enumerate().rev() {
        if !new_index.contains_key(section.name.as_str()) {
            changes.sections.push(SectionChange::Delete {
                index,
                name: section.name.clone(),
            });
        }
    }
    for (index, section) in new.iter().enumerate() {
        if !old_index.contains_key(section.name.as_str()) {
            changes.sections.push(SectionChange::Insert {
                index,
                name: section.name.clone(),
            });
        }
    }

    // Surviving sections in new order, with where each one used to be.
    let kept_sections: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(n, s)| old_index.get(s.name.as_str()).map(|&o| (o, n)))
        .collect();
    let old_order: Vec<usize> = kept_sections.iter().map(|(o, _)| *o).collect();
    let stable_sections = longest_increasing_subsequence(&old_order);
    for (i, &(from, to)) in kept_sections.iter().enumerate() {
        if !stable_sections[i] {
            changes.sections.push(SectionChange::Move {
                old_index: from,
                new_index: to,
                name: new[to].name.clone(),
            });
        }
    }

    let before = locate(old);
    let after = locate(new);

    let mut deleted: Vec<_> = before
        .iter()
        .filter(|(id, _)| !after.contains_key(id))
        .map(|(id, at)| (at.path, *id))
        .collect();
    deleted.sort_by(|a, b| b.0.cmp(&a.0));
    changes.objects.extend(
        deleted
            .into_iter()
            .map(|(old_path, id)| ObjectChange::Delete { id, old_path }),
    );

    let mut inserted: Vec<_> = after
        .iter()
        .filter(|(id, _)| !before.contains_key(id))
        .map(|(id, at)| (at.path, *id))
        .collect();
    inserted.sort();
    changes.objects.extend(
        inserted
            .into_iter()
            .map(|(new_path, id)| ObjectChange::Insert { id, new_path }),
    );

    let mut updates = Vec::new();
    for (s, section) in new.iter().enumerate() {
        // Survivors in new row order; `None` marks one arriving from another section.
        let survivors: Vec<(usize, &Located<'_>, Option<usize>)> = section
            .objects
            .iter()
            .enumerate()
            .filter_map(|(row, object)| before.get(&object.id()).map(|then| (row, then)))
            .map(|(row, then)| {
                let old_row = (then.section == section.name).then_some(then.path.row);
                (row, then, old_row)
            })
            .collect();

        let old_rows: Vec<usize> = survivors.iter().filter_map(|(_, _, r)| *r).collect();
        let mut stable = longest_increasing_subsequence(&old_rows).into_iter();

        for (row, then, old_row) in survivors {
            let id = then.object.id();
            let new_path = IndexPath::new(s, row);
            let in_place = old_row.is_some() && stable.next().unwrap_or(false);
            if !in_place {
                changes.objects.push(ObjectChange::Move {
                    id,
                    old_path: then.path,
                    new_path,
                });
            } else if then.object.attributes() != section.objects[row].attributes() {
                updates.push(ObjectChange::Update {
                    id,
                    old_path: then.path,
                    new_path,
                });
            }
        }
    }
    changes.objects.extend(updates);

    changes
}

/// Mark the members of one longest strictly increasing subsequence.
fn longest_increasing_subsequence(sequence: &[usize]) -> Vec<bool> {
    // tails[k]: index in `sequence` of the smallest tail of a run of length k+1.
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];

    for (i, &value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&t| sequence[t] < value);
        if slot > 0 {
            previous[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut members = vec![false; sequence.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        members[i] = true;
        cursor = previous[i];
    }
    members
}
