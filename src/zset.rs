//! Sorted set: a member -> score dict paired with a skiplist.
//!
//! The two structures always hold the same element set; the dict answers
//! point lookups, the skiplist answers order and rank queries.

use bytes::Bytes;

use crate::dict::Dict;
use crate::skiplist::Skiplist;

/// Input flags for [`Zset::add`], mirroring the ZADD option set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZAddFlags {
    pub nx: bool,
    pub xx: bool,
    pub gt: bool,
    pub lt: bool,
    pub incr: bool,
}

/// Outcome of a single (score, member) application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZAddResult {
    /// Member was absent and has been inserted with this score.
    Added(f64),
    /// Member existed and moved to this score.
    Updated(f64),
    /// Member existed and the score did not change.
    Unchanged(f64),
    /// A conditional flag suppressed the operation.
    Nop,
    /// The (possibly incremented) score is not a number.
    Nan,
}

#[derive(Debug, Default)]
pub struct Zset {
    dict: Dict<f64>,
    zsl: Skiplist,
}

impl Zset {
    pub fn new() -> Zset {
        Zset {
            dict: Dict::new(),
            zsl: Skiplist::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.zsl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zsl.is_empty()
    }

    pub fn score(&mut self, ele: &[u8]) -> Option<f64> {
        self.dict.get(ele).copied()
    }

    pub fn skiplist(&self) -> &Skiplist {
        &self.zsl
    }

    /// Apply one (score, member) pair under the given flags. Flag
    /// compatibility (NX/XX, GT/LT/NX, INCR pair count) is the caller's
    /// concern; this implements the per-element decision table.
    pub fn add(&mut self, score: f64, ele: &Bytes, flags: ZAddFlags) -> ZAddResult {
        if score.is_nan() {
            return ZAddResult::Nan;
        }
        match self.dict.get(ele).copied() {
            Some(current) => {
                if flags.nx {
                    return ZAddResult::Nop;
                }
                let mut next = score;
                if flags.incr {
                    next = current + score;
                    if next.is_nan() {
                        return ZAddResult::Nan;
                    }
                }
                if flags.gt && next <= current {
                    return ZAddResult::Nop;
                }
                if flags.lt && next >= current {
                    return ZAddResult::Nop;
                }
                if next != current {
                    self.zsl.update_score(ele, current, next);
                    self.dict.set(ele.clone(), next);
                    ZAddResult::Updated(next)
                } else {
                    ZAddResult::Unchanged(next)
                }
            }
            None => {
                if flags.xx {
                    return ZAddResult::Nop;
                }
                self.zsl.insert(score, ele.clone());
                let _ = self.dict.add(ele.clone(), score);
                ZAddResult::Added(score)
            }
        }
    }

    pub fn remove(&mut self, ele: &[u8]) -> bool {
        match self.dict.remove(ele) {
            Ok(score) => {
                self.zsl.delete(score, ele);
                true
            }
            Err(_) => false,
        }
    }

    /// 0-based rank; reverse counts from the high end.
    pub fn rank(&mut self, ele: &[u8], reverse: bool) -> Option<usize> {
        let score = self.dict.get(ele).copied()?;
        let rank = self.zsl.rank(score, ele)?;
        Some(if reverse {
            self.zsl.len() - rank
        } else {
            rank - 1
        })
    }

    pub fn pop_min(&mut self) -> Option<(Bytes, f64)> {
        let id = self.zsl.first_id()?;
        let (ele, score) = self.zsl.entry(id);
        let ele = ele.clone();
        self.remove(&ele);
        Some((ele, score))
    }

    pub fn pop_max(&mut self) -> Option<(Bytes, f64)> {
        let id = self.zsl.last_id()?;
        let (ele, score) = self.zsl.entry(id);
        let ele = ele.clone();
        self.remove(&ele);
        Some((ele, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ele(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn add_update_and_agreement() {
        let mut zs = Zset::new();
        assert_eq!(zs.add(1.0, &ele("a"), ZAddFlags::default()), ZAddResult::Added(1.0));
        assert_eq!(zs.add(2.0, &ele("b"), ZAddFlags::default()), ZAddResult::Added(2.0));
        assert_eq!(
            zs.add(5.0, &ele("a"), ZAddFlags::default()),
            ZAddResult::Updated(5.0)
        );
        assert_eq!(
            zs.add(5.0, &ele("a"), ZAddFlags::default()),
            ZAddResult::Unchanged(5.0)
        );

        assert_eq!(zs.len(), 2);
        assert_eq!(zs.score(b"a"), Some(5.0));
        assert_eq!(zs.skiplist().rank(5.0, b"a"), Some(2));
    }

    #[test]
    fn nx_and_xx_gate_existence() {
        let mut zs = Zset::new();
        let nx = ZAddFlags { nx: true, ..Default::default() };
        let xx = ZAddFlags { xx: true, ..Default::default() };

        assert_eq!(zs.add(1.0, &ele("a"), xx), ZAddResult::Nop);
        assert_eq!(zs.add(1.0, &ele("a"), nx), ZAddResult::Added(1.0));
        assert_eq!(zs.add(9.0, &ele("a"), nx), ZAddResult::Nop);
        assert_eq!(zs.score(b"a"), Some(1.0));
        assert_eq!(zs.add(9.0, &ele("a"), xx), ZAddResult::Updated(9.0));
    }

    #[test]
    fn gt_and_lt_gate_direction() {
        let mut zs = Zset::new();
        zs.add(5.0, &ele("a"), ZAddFlags::default());

        let gt = ZAddFlags { gt: true, ..Default::default() };
        let lt = ZAddFlags { lt: true, ..Default::default() };

        assert_eq!(zs.add(3.0, &ele("a"), gt), ZAddResult::Nop);
        assert_eq!(zs.add(5.0, &ele("a"), gt), ZAddResult::Nop);
        assert_eq!(zs.add(7.0, &ele("a"), gt), ZAddResult::Updated(7.0));

        assert_eq!(zs.add(9.0, &ele("a"), lt), ZAddResult::Nop);
        assert_eq!(zs.add(2.0, &ele("a"), lt), ZAddResult::Updated(2.0));
    }

    #[test]
    fn incr_is_additive() {
        let mut zs = Zset::new();
        let incr = ZAddFlags { incr: true, ..Default::default() };

        assert_eq!(zs.add(3.0, &ele("a"), incr), ZAddResult::Added(3.0));
        assert_eq!(zs.add(4.0, &ele("a"), incr), ZAddResult::Updated(7.0));
        assert_eq!(zs.score(b"a"), Some(7.0));
    }

    #[test]
    fn nan_scores_are_rejected() {
        let mut zs = Zset::new();
        assert_eq!(zs.add(f64::NAN, &ele("a"), ZAddFlags::default()), ZAddResult::Nan);
        assert!(zs.is_empty());

        // inf - inf through INCR is also NaN.
        let incr = ZAddFlags { incr: true, ..Default::default() };
        zs.add(f64::INFINITY, &ele("a"), incr);
        assert_eq!(zs.add(f64::NEG_INFINITY, &ele("a"), incr), ZAddResult::Nan);
        assert_eq!(zs.score(b"a"), Some(f64::INFINITY));
    }

    #[test]
    fn remove_keeps_structures_in_lockstep() {
        let mut zs = Zset::new();
        for i in 0..20 {
            zs.add(i as f64, &ele(&format!("m{i}")), ZAddFlags::default());
        }
        assert!(zs.remove(b"m10"));
        assert!(!zs.remove(b"m10"));
        assert_eq!(zs.len(), 19);
        assert_eq!(zs.score(b"m10"), None);
        assert_eq!(zs.skiplist().rank(11.0, b"m11"), Some(11));
    }

    #[test]
    fn ranks_count_from_either_end() {
        let mut zs = Zset::new();
        zs.add(2.0, &ele("b"), ZAddFlags::default());
        zs.add(3.0, &ele("c"), ZAddFlags::default());
        zs.add(11.0, &ele("a"), ZAddFlags::default());

        assert_eq!(zs.rank(b"b", false), Some(0));
        assert_eq!(zs.rank(b"c", false), Some(1));
        assert_eq!(zs.rank(b"a", false), Some(2));

        assert_eq!(zs.rank(b"a", true), Some(0));
        assert_eq!(zs.rank(b"c", true), Some(1));
        assert_eq!(zs.rank(b"b", true), Some(2));

        assert_eq!(zs.rank(b"missing", false), None);
    }

    #[test]
    fn pops_take_the_extremes() {
        let mut zs = Zset::new();
        zs.add(1.0, &ele("low"), ZAddFlags::default());
        zs.add(9.0, &ele("high"), ZAddFlags::default());
        zs.add(5.0, &ele("mid"), ZAddFlags::default());

        assert_eq!(zs.pop_min(), Some((ele("low"), 1.0)));
        assert_eq!(zs.pop_max(), Some((ele("high"), 9.0)));
        assert_eq!(zs.pop_max(), Some((ele("mid"), 5.0)));
        assert_eq!(zs.pop_max(), None);
    }
}
