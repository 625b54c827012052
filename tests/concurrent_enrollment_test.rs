// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证同班级分配串行化与容量不变量在并发下成立
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod concurrent_enrollment_test {
    use course_enroll::domain::types::EnrollmentStatus;
    use course_enroll::engine::{AllocationOutcome, CapacityManager, OptionalEventPublisher};
    use course_enroll::repository::class_config_repo::ClassConfigRepository;
    use course_enroll::repository::enrollment_repo::EnrollmentRepository;
    use course_enroll::repository::waitlist_repo::WaitlistRepository;
    use std::sync::Arc;
    use std::thread;

    use crate::test_helpers::{create_test_db, open_class, open_shared_conn, ts};

    // ==========================================
    // 测试1: capacity=1 下 100 并发请求,恰好 1 人入班
    // ==========================================

    #[test]
    fn test_single_seat_under_hundred_concurrent_requests() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared_conn(&db_path);
        let capacity =
            Arc::new(CapacityManager::new(conn.clone(), OptionalEventPublisher::none()));
        let classes = ClassConfigRepository::new(conn.clone());

        let config = open_class("CLS001", "INST001", 1, 10);
        classes.upsert(&config).unwrap();
        let now = ts(2026, 9, 1, 9, 0);

        let thread_count = 100;
        let mut handles = vec![];
        for i in 0..thread_count {
            let capacity = capacity.clone();
            let config = config.clone();
            let handle = thread::spawn(move || {
                let student = format!("S{:03}", i);
                capacity.allocate(&config, &student, &student, 0, now)
            });
            handles.push(handle);
        }

        let mut enrolled = 0;
        let mut waitlisted = 0;
        let mut rejected = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(AllocationOutcome::Enrolled { .. }) => enrolled += 1,
                Ok(AllocationOutcome::Waitlisted { .. }) => waitlisted += 1,
                Ok(AllocationOutcome::Rejected { .. }) => rejected += 1,
                Err(_) => failed += 1,
            }
        }

        // 恰好 1 人入班,其余候补或拒绝; 串行化下不允许分配层面的失败
        assert_eq!(enrolled, 1, "应恰好 1 人入班");
        assert_eq!(waitlisted, 10, "候补应恰好填满");
        assert_eq!(rejected, thread_count - 1 - 10);
        assert_eq!(failed, 0, "串行化分配不应出现系统错误");

        // 落库口径复核
        let enrollments = EnrollmentRepository::new(conn.clone());
        let waitlists = WaitlistRepository::new(conn.clone());
        assert_eq!(
            enrollments.count_by_status("CLS001", EnrollmentStatus::Enrolled).unwrap(),
            1
        );
        assert_eq!(waitlists.count("CLS001").unwrap(), 10);

        println!("✅ 单席位并发测试通过: 100 并发恰好 1 人入班");
    }

    // ==========================================
    // 测试2: 容量不变量 — 任意容量下并发不超卖
    // ==========================================

    #[test]
    fn test_capacity_invariant_under_concurrency() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared_conn(&db_path);
        let capacity =
            Arc::new(CapacityManager::new(conn.clone(), OptionalEventPublisher::none()));
        let classes = ClassConfigRepository::new(conn.clone());

        let config = open_class("CLS002", "INST001", 7, 3);
        classes.upsert(&config).unwrap();
        let now = ts(2026, 9, 1, 9, 0);

        let thread_count = 40;
        let mut handles = vec![];
        for i in 0..thread_count {
            let capacity = capacity.clone();
            let config = config.clone();
            handles.push(thread::spawn(move || {
                let student = format!("T{:03}", i);
                capacity.allocate(&config, &student, &student, 0, now)
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let enrollments = EnrollmentRepository::new(conn.clone());
        let waitlists = WaitlistRepository::new(conn.clone());
        let enrolled = enrollments.count_by_status("CLS002", EnrollmentStatus::Enrolled).unwrap();
        let waitlisted = waitlists.count("CLS002").unwrap();

        assert!(enrolled <= 7, "enrolled_count 不得超过 capacity: {}", enrolled);
        assert!(waitlisted <= 3, "候补不得超过 waitlist_capacity: {}", waitlisted);
        assert_eq!(enrolled, 7);
        assert_eq!(waitlisted, 3);

        // 候补位次稠密无重复
        let entries = waitlists.list_by_class("CLS002").unwrap();
        let mut positions: Vec<i32> = entries.iter().map(|e| e.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![1, 2, 3]);

        println!("✅ 并发容量不变量测试通过");
    }

    // ==========================================
    // 测试3: 不同班级分配互不阻塞且互不干扰
    // ==========================================

    #[test]
    fn test_allocation_across_classes_is_independent() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared_conn(&db_path);
        let capacity =
            Arc::new(CapacityManager::new(conn.clone(), OptionalEventPublisher::none()));
        let classes = ClassConfigRepository::new(conn.clone());

        let class_count = 5;
        let per_class = 4;
        for c in 0..class_count {
            let config = open_class(&format!("CLS1{:02}", c), "INST001", per_class, 0);
            classes.upsert(&config).unwrap();
        }
        let now = ts(2026, 9, 1, 9, 0);

        let mut handles = vec![];
        for c in 0..class_count {
            for i in 0..per_class {
                let capacity = capacity.clone();
                let config = open_class(&format!("CLS1{:02}", c), "INST001", per_class, 0);
                handles.push(thread::spawn(move || {
                    let student = format!("C{}S{}", c, i);
                    capacity.allocate(&config, &student, &student, 0, now)
                }));
            }
        }

        let mut enrolled = 0;
        for handle in handles {
            if let Ok(AllocationOutcome::Enrolled { .. }) = handle.join().unwrap() {
                enrolled += 1;
            }
        }
        // 每个班级各自容量内全部成功
        assert_eq!(enrolled, class_count * per_class);

        let enrollments = EnrollmentRepository::new(conn.clone());
        for c in 0..class_count {
            let count = enrollments
                .count_by_status(&format!("CLS1{:02}", c), EnrollmentStatus::Enrolled)
                .unwrap();
            assert_eq!(count, per_class as i64);
        }

        println!("✅ 跨班级独立分配测试通过");
    }
}
