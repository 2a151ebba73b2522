//! The job table: background and stopped process groups of this session.
//!
//! Entries are not removed when their processes exit. Instead [`JobTable::cleanup`]
//! polls each group without blocking and drops the ones with no members left;
//! `jobs`, `fg` and `bg` call it before they look at the table.

use log::{debug, info};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt;

/// Small positive job number shown to the user.
pub type JobId = usize;

/// Scheduling state of a job's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so width specifiers work in listings.
        f.pad(match self {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        })
    }
}

/// A tracked process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub pgid: Pid,
    /// The command text as the user typed it.
    pub command: String,
    pub state: JobState,
}

/// What a non-blocking poll learned about a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPoll {
    /// Members remain; carries the latest reported state change, if any.
    Alive(Option<JobState>),
    /// Every member has exited and been reaped.
    Gone,
}

/// Jobs ordered by id. Ids grow monotonically and are never reused.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    last_assigned: JobId,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process group and return its new job id.
    pub fn add(&mut self, pgid: Pid, command: impl Into<String>, state: JobState) -> JobId {
        self.last_assigned += 1;
        let id = self.last_assigned;
        let command = command.into();
        info!("job [{id}] pgid {pgid} added as {state}: {command}");
        self.jobs.insert(
            id,
            Job {
                id,
                pgid,
                command,
                state,
            },
        );
        id
    }

    /// Update the state of the job owning `pgid`. Returns `false` if none does.
    pub fn set_state(&mut self, pgid: Pid, state: JobState) -> bool {
        match self.jobs.values_mut().find(|job| job.pgid == pgid) {
            Some(job) => {
                debug!("job [{}] pgid {pgid} is now {state}", job.id);
                job.state = state;
                true
            }
            None => false,
        }
    }

    /// Resolve a job id to its process group; `None` means the most recent job.
    pub fn get_pgid(&self, id: Option<JobId>) -> Option<Pid> {
        match id {
            Some(id) => self.jobs.get(&id).map(|job| job.pgid),
            None => self.most_recent().map(|job| job.pgid),
        }
    }

    /// The job with the highest id.
    pub fn most_recent(&self) -> Option<&Job> {
        self.jobs.values().next_back()
    }

    pub fn find_by_pgid(&self, pgid: Pid) -> Option<&Job> {
        self.jobs.values().find(|job| job.pgid == pgid)
    }

    /// Drop the job owning `pgid`.
    pub fn remove(&mut self, pgid: Pid) -> Option<Job> {
        let id = self.find_by_pgid(pgid)?.id;
        let job = self.jobs.remove(&id);
        info!("job [{id}] pgid {pgid} removed");
        job
    }

    /// Jobs in id order. Each call starts a fresh pass over the current table.
    pub fn list(&self) -> impl Iterator<Item = &Job> + '_ {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Poll every job and forget the groups that have fully exited.
    pub fn cleanup(&mut self) {
        let mut gone = Vec::new();
        for job in self.jobs.values_mut() {
            match poll_group(job.pgid) {
                GroupPoll::Gone => gone.push(job.id),
                GroupPoll::Alive(Some(state)) => job.state = state,
                GroupPoll::Alive(None) => {}
            }
        }
        for id in gone {
            if let Some(job) = self.jobs.remove(&id) {
                info!("job [{id}] pgid {} finished", job.pgid);
            }
        }
    }
}

/// Parse a job reference: `%N` or bare `N`.
pub fn parse_job_ref(reference: &str) -> Option<JobId> {
    let digits = reference.strip_prefix('%').unwrap_or(reference);
    digits.parse().ok().filter(|&id| id > 0)
}

/// Reap whatever members of `pgid` have changed state, without blocking.
pub fn poll_group(pgid: Pid) -> GroupPoll {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    let mut latest = None;
    loop {
        match waitpid(Pid::from_raw(-pgid.as_raw()), Some(flags)) {
            Ok(WaitStatus::StillAlive) => return GroupPoll::Alive(latest),
            Ok(WaitStatus::Stopped(..)) => latest = Some(JobState::Stopped),
            Ok(WaitStatus::Continued(_)) => latest = Some(JobState::Running),
            Ok(_) => {}
            Err(Errno::EINTR) => {}
            Err(_) => return GroupPoll::Gone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal, killpg};
    use pretty_assertions::assert_eq;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::thread;
    use std::time::Duration;

    fn spawn_group(secs: &str) -> Pid {
        let child = Command::new("sleep")
            .arg(secs)
            .process_group(0)
            .spawn()
            .expect("spawn sleep");
        Pid::from_raw(child.id() as i32)
    }

    fn poll_until(pgid: Pid, wanted: GroupPoll) -> bool {
        for _ in 0..100 {
            if poll_group(pgid) == wanted {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut table = JobTable::new();
        let a = table.add(Pid::from_raw(100), "a", JobState::Running);
        let b = table.add(Pid::from_raw(200), "b", JobState::Stopped);
        assert_eq!((a, b), (1, 2));

        table.remove(Pid::from_raw(200));
        let c = table.add(Pid::from_raw(300), "c", JobState::Running);
        assert_eq!(c, 3);
    }

    #[test]
    fn bare_reference_resolves_to_most_recent() {
        let mut table = JobTable::new();
        assert_eq!(table.get_pgid(None), None);

        table.add(Pid::from_raw(100), "a", JobState::Running);
        table.add(Pid::from_raw(200), "b", JobState::Running);
        assert_eq!(table.get_pgid(None), Some(Pid::from_raw(200)));
        assert_eq!(table.get_pgid(Some(1)), Some(Pid::from_raw(100)));
        assert_eq!(table.get_pgid(Some(7)), None);
    }

    #[test]
    fn set_state_and_list_in_id_order() {
        let mut table = JobTable::new();
        table.add(Pid::from_raw(100), "a", JobState::Running);
        table.add(Pid::from_raw(200), "b", JobState::Running);
        assert!(table.set_state(Pid::from_raw(100), JobState::Stopped));
        assert!(!table.set_state(Pid::from_raw(999), JobState::Stopped));

        let listed: Vec<_> = table.list().map(|j| (j.id, j.state)).collect();
        assert_eq!(listed, vec![(1, JobState::Stopped), (2, JobState::Running)]);
        // The listing can be taken again.
        assert_eq!(table.list().count(), 2);
    }

    #[test]
    fn job_references() {
        assert_eq!(parse_job_ref("%2"), Some(2));
        assert_eq!(parse_job_ref("7"), Some(7));
        assert_eq!(parse_job_ref("%0"), None);
        assert_eq!(parse_job_ref("%x"), None);
        assert_eq!(parse_job_ref(""), None);
    }

    #[test]
    fn state_display_pads() {
        assert_eq!(format!("{:<9}|", JobState::Running), "Running  |");
    }

    #[test]
    fn cleanup_drops_exited_groups_only() {
        let mut table = JobTable::new();
        let short = spawn_group("0");
        let long = spawn_group("30");
        table.add(short, "sleep 0", JobState::Running);
        table.add(long, "sleep 30", JobState::Running);

        thread::sleep(Duration::from_millis(300));
        for _ in 0..50 {
            table.cleanup();
            if table.len() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.get_pgid(None), Some(long));

        killpg(long, Signal::SIGKILL).unwrap();
        assert!(poll_until(long, GroupPoll::Gone));
    }

    #[test]
    fn poll_reports_stop_and_continue() {
        let pgid = spawn_group("30");

        killpg(pgid, Signal::SIGSTOP).unwrap();
        assert!(poll_until(pgid, GroupPoll::Alive(Some(JobState::Stopped))));

        killpg(pgid, Signal::SIGCONT).unwrap();
        assert!(poll_until(pgid, GroupPoll::Alive(Some(JobState::Running))));

        killpg(pgid, Signal::SIGKILL).unwrap();
        assert!(poll_until(pgid, GroupPoll::Gone));
    }
}
