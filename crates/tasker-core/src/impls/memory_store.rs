//! In-memory todo store + user directory.
//!
//! Same query semantics as the SQLite store; used by tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Todo, TodoStatus, UserBatchStat};
use crate::ports::{DirectoryError, StoreError, TodoStore, UserDirectory};

#[derive(Default)]
pub struct InMemoryTodoStore {
    todos: Mutex<BTreeMap<Uuid, Todo>>,
    users: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

fn in_window(t: Option<DateTime<Utc>>, since: DateTime<Utc>, until: DateTime<Utc>) -> bool {
    t.is_some_and(|t| t >= since && t <= until)
}

fn is_overdue(todo: &Todo, now: DateTime<Utc>) -> bool {
    !todo.status.is_finished() && todo.due_date.is_some_and(|due| due < now)
}

/// Sort by `key` ascending (None last), ties by id, then cap.
fn sorted_by<F>(mut todos: Vec<Todo>, key: F, limit: usize) -> Vec<Todo>
where
    F: Fn(&Todo) -> Option<DateTime<Utc>>,
{
    todos.sort_by(|a, b| match (key(a), key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
    todos.truncate(limit);
    todos
}

impl InMemoryTodoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, todo: Todo) {
        self.todos.lock().await.insert(todo.id, todo);
    }

    pub async fn add_user(&self, user_id: impl Into<String>, email: impl Into<String>) {
        self.users.lock().await.insert(user_id.into(), email.into());
    }

    pub async fn get(&self, id: Uuid) -> Option<Todo> {
        self.todos.lock().await.get(&id).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Other("store is closed".to_string()));
        }
        Ok(())
    }

    async fn select<P>(&self, pred: P) -> Result<Vec<Todo>, StoreError>
    where
        P: Fn(&Todo) -> bool,
    {
        self.ensure_open()?;
        let todos = self.todos.lock().await;
        Ok(todos.values().filter(|t| pred(t)).cloned().collect())
    }
}

#[async_trait]
impl TodoStore for InMemoryTodoStore {
    async fn todos_due_within(
        &self,
        now: DateTime<Utc>,
        hours: u32,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let horizon = now + Duration::hours(i64::from(hours));
        let due = self
            .select(|t| {
                !t.status.is_finished() && t.due_date.is_some_and(|d| d > now && d <= horizon)
            })
            .await?;
        Ok(sorted_by(due, |t| t.due_date, limit))
    }

    async fn overdue_todos(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let overdue = self.select(|t| is_overdue(t, now)).await?;
        Ok(sorted_by(overdue, |t| t.due_date, limit))
    }

    async fn completed_todos_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let old = self
            .select(|t| {
                t.status == TodoStatus::Completed && t.completed_at.is_some_and(|c| c < cutoff)
            })
            .await?;
        Ok(sorted_by(old, |t| t.completed_at, limit))
    }

    async fn weekly_stats(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UserBatchStat>, StoreError> {
        self.ensure_open()?;
        let todos = self.todos.lock().await;

        let mut stats: BTreeMap<&str, (UserBatchStat, bool)> = BTreeMap::new();
        for todo in todos.values() {
            let (stat, active_user) = stats.entry(todo.user_id.as_str()).or_insert_with(|| {
                (
                    UserBatchStat {
                        user_id: todo.user_id.clone(),
                        ..UserBatchStat::default()
                    },
                    false,
                )
            });

            let created = in_window(Some(todo.created_at), since, until);
            let completed =
                todo.status == TodoStatus::Completed && in_window(todo.completed_at, since, until);
            if created {
                stat.created_count += 1;
            }
            if completed {
                stat.completed_count += 1;
            }
            if todo.status == TodoStatus::Active {
                stat.active_count += 1;
            }
            if is_overdue(todo, until) {
                stat.overdue_count += 1;
            }
            *active_user |= todo.status != TodoStatus::Archived
                || created
                || in_window(todo.completed_at, since, until);
        }

        Ok(stats
            .into_values()
            .filter(|(_, active)| *active)
            .map(|(stat, _)| stat)
            .collect())
    }

    async fn completed_todos_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let mut done = self
            .select(|t| {
                t.user_id == user_id
                    && t.status == TodoStatus::Completed
                    && in_window(t.completed_at, since, until)
            })
            .await?;
        // most recent first
        done.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then_with(|| a.id.cmp(&b.id)));
        done.truncate(limit);
        Ok(done)
    }

    async fn overdue_todos_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Todo>, StoreError> {
        let overdue = self
            .select(|t| t.user_id == user_id && is_overdue(t, now))
            .await?;
        Ok(sorted_by(overdue, |t| t.due_date, limit))
    }

    async fn archive_todos(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let mut todos = self.todos.lock().await;
        let mut archived = 0;
        for id in ids {
            let Some(todo) = todos.get_mut(id) else {
                continue;
            };
            if todo.status == TodoStatus::Completed {
                todo.status = TodoStatus::Archived;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryTodoStore {
    async fn email_for(&self, user_id: &str) -> Result<String, DirectoryError> {
        self.users
            .lock()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(user_id.to_string()))
    }
}
