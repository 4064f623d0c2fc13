use std::collections::VecDeque;

/// Newest-first buffer that evicts its oldest entries past `capacity`.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Puts `records` in front of the existing entries, keeping their relative order.
    pub fn prepend(&mut self, records: Vec<T>) {
        for record in records.into_iter().take(self.capacity).rev() {
            self.entries.push_front(record);
        }
        self.entries.truncate(self.capacity);
    }

    /// Replaces the contents; `records` must already be newest first.
    pub fn replace(&mut self, records: Vec<T>) {
        self.entries = records.into_iter().take(self.capacity).collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_capped() {
        let mut log = BoundedLog::new(3);
        log.prepend(vec![1]);
        log.prepend(vec![2]);
        log.prepend(vec![3]);
        log.prepend(vec![4]);
        assert_eq!(log.to_vec(), vec![4, 3, 2]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn batch_prepend_keeps_given_order() {
        let mut log = BoundedLog::new(5);
        log.prepend(vec![1, 2]);
        log.prepend(vec![10, 11, 12]);
        assert_eq!(log.to_vec(), vec![10, 11, 12, 1, 2]);
    }

    #[test]
    fn oversized_batch_keeps_its_head() {
        let mut log = BoundedLog::new(2);
        log.prepend(vec![7]);
        log.prepend(vec![1, 2, 3, 4]);
        assert_eq!(log.to_vec(), vec![1, 2]);
    }

    #[test]
    fn replace_truncates() {
        let mut log = BoundedLog::new(2);
        log.replace(vec![9, 8, 7]);
        assert_eq!(log.to_vec(), vec![9, 8]);
        log.clear();
        assert!(log.is_empty());
        log.prepend(vec![1, 2, 3]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn never_exceeds_capacity_under_mixed_appends() {
        let mut log = BoundedLog::new(50);
        for round in 0..40 {
            log.prepend((0..round % 7).collect());
            assert!(log.len() <= 50);
        }
        assert_eq!(log.len(), 50);
    }
}
