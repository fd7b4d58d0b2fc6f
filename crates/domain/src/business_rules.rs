//! 报名准入规则
//!
//! 规则本身是纯函数，由仓储在持有项目行锁和志愿者行锁的事务内调用，
//! 这样"读取已占用名额 → 判断 → 写入"对同一项目是线性化的。

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{GuestCount, ProjectId};

/// 在锁内读取到的项目与志愿者状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub project_id: ProjectId,
    pub capacity: i64,
    /// 该项目所有 registered 记录的 (1 + guest_count) 之和
    pub committed: i64,
    /// 志愿者当前持有的有效报名所在项目（任意项目）
    pub active_registration: Option<ProjectId>,
}

pub struct RegistrationRules;

impl RegistrationRules {
    /// 判断一次报名是否可以被接受。
    ///
    /// 先检查名额，再检查志愿者是否已持有有效报名。
    pub fn admit(snapshot: &AdmissionSnapshot, guest_count: GuestCount) -> DomainResult<()> {
        let requested = guest_count.party_size();
        let remaining = (snapshot.capacity - snapshot.committed).max(0);
        if requested > remaining {
            return Err(DomainError::CapacityExceeded {
                requested,
                remaining,
            });
        }

        if let Some(project_id) = snapshot.active_registration {
            if project_id == snapshot.project_id {
                return Err(DomainError::DuplicateRegistration { project_id });
            }
            return Err(DomainError::ConflictingRegistration { project_id });
        }

        Ok(())
    }
}
