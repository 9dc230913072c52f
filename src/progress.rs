// Progress bookkeeping for a single enrollment. Pure functions, no I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Enrollment, Section, SectionProgress};

/// round(100 * completed / total), rounding halves up.
///
/// When the course is resolvable its current section list is the
/// denominator and only progress entries that still point at one of those
/// sections count as completed; entries for removed or unknown sections are
/// ignored. Without a course the progress entries themselves are the
/// denominator.
pub fn completion_percentage(progress: &[SectionProgress], sections: Option<&[Section]>) -> u8 {
    let (done, total) = match sections {
        Some(sections) => {
            let done = sections
                .iter()
                .filter(|s| progress.iter().any(|p| p.section_id == s.id && p.completed))
                .count();
            (done, sections.len())
        }
        None => (progress.iter().filter(|p| p.completed).count(), progress.len()),
    };
    if total == 0 {
        return 0;
    }
    ((done * 200 + total) / (total * 2)).min(100) as u8
}

/// Sets the completed flag of one section, appending an entry when the
/// section joined the course after enrollment.
///
/// `completed_at` is stamped on the false->true edge and cleared when a
/// section is marked incomplete again. A `None` flag leaves an existing entry
/// untouched.
pub fn apply_section(
    progress: &mut Vec<SectionProgress>,
    section_id: Uuid,
    completed: Option<bool>,
    now: DateTime<Utc>,
) {
    match progress.iter_mut().find(|p| p.section_id == section_id) {
        Some(entry) => match completed {
            Some(true) if !entry.completed => {
                entry.completed = true;
                entry.completed_at = Some(now);
            }
            Some(false) => {
                entry.completed = false;
                entry.completed_at = None;
            }
            _ => {}
        },
        None => {
            let completed = completed.unwrap_or(false);
            progress.push(SectionProgress {
                section_id,
                completed,
                completed_at: completed.then_some(now),
            });
        }
    }
}

pub fn certificate_url(enrollment_id: Uuid) -> String {
    format!("/certificates/{enrollment_id}")
}

/// Recomputes the percentage and fires the one-shot completion transition.
/// Returns true only on the call that flipped `is_completed`.
pub fn settle(enrollment: &mut Enrollment, sections: Option<&[Section]>, now: DateTime<Utc>) -> bool {
    enrollment.completion_percentage = completion_percentage(&enrollment.progress, sections);
    if enrollment.completion_percentage < 100 || enrollment.is_completed {
        return false;
    }
    enrollment.is_completed = true;
    enrollment.completed_at = Some(now);
    enrollment.certificate_issued = true;
    enrollment.certificate_url = Some(certificate_url(enrollment.id));
    true
}
