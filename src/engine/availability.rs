use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Snapshot check: does the room have no live claim overlapping `range`?
/// Advisory only — the authoritative check runs again inside acquire,
/// under the room's write lock.
pub fn room_is_free(rs: &RoomState, range: &TimeRange, now: Ms) -> bool {
    rs.overlapping(range).all(|c| !c.is_live(now))
}

/// Compute the free sub-intervals of `query` for one room: the query
/// window minus all live claims, clamped and merged.
pub fn free_windows(rs: &RoomState, query: &TimeRange, now: Ms) -> Vec<TimeRange> {
    let mut occupied: Vec<TimeRange> = Vec::new();
    for claim in rs.overlapping(query) {
        if claim.is_live(now) {
            occupied.push(TimeRange::new(
                claim.range.start.max(query.start),
                claim.range.end.min(query.end),
            ));
        }
    }

    if occupied.is_empty() {
        return vec![*query];
    }

    occupied.sort_by_key(|r| r.start);
    let occupied = merge_overlapping(&occupied);
    subtract_intervals(&[*query], &occupied)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

pub fn subtract_intervals(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeRange::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn make_room(claims: Vec<Claim>) -> RoomState {
        let mut rs = RoomState::new(Ulid::new(), None, None, 1, None);
        for c in claims {
            rs.insert_claim(c);
        }
        rs
    }

    fn booking(start: Ms, end: Ms) -> Claim {
        Claim {
            id: Ulid::new(),
            range: TimeRange::new(start, end),
            kind: ClaimKind::Booking {
                owner: "alice".into(),
                created_at: 0,
            },
        }
    }

    fn lock(start: Ms, end: Ms, expires_at: Ms) -> Claim {
        Claim {
            id: Ulid::new(),
            range: TimeRange::new(start, end),
            kind: ClaimKind::Lock {
                owner: "alice".into(),
                created_at: 0,
                expires_at,
            },
        }
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![TimeRange::new(100, 200), TimeRange::new(300, 400)];
        let remove = vec![TimeRange::new(200, 300)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![TimeRange::new(100, 200)];
        let remove = vec![TimeRange::new(50, 250)];
        let result = subtract_intervals(&base, &remove);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_partial_left() {
        let base = vec![TimeRange::new(100, 200)];
        let remove = vec![TimeRange::new(50, 150)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![TimeRange::new(150, 200)]);
    }

    #[test]
    fn subtract_partial_right() {
        let base = vec![TimeRange::new(100, 200)];
        let remove = vec![TimeRange::new(150, 250)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![TimeRange::new(100, 150)]);
    }

    #[test]
    fn subtract_middle_punch() {
        let base = vec![TimeRange::new(100, 300)];
        let remove = vec![TimeRange::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![TimeRange::new(100, 150), TimeRange::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![TimeRange::new(0, 1000)];
        let remove = vec![
            TimeRange::new(100, 200),
            TimeRange::new(400, 500),
            TimeRange::new(800, 900),
        ];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(
            result,
            vec![
                TimeRange::new(0, 100),
                TimeRange::new(200, 400),
                TimeRange::new(500, 800),
                TimeRange::new(900, 1000),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_basic() {
        let ranges = vec![
            TimeRange::new(100, 300),
            TimeRange::new(200, 400),
            TimeRange::new(500, 600),
        ];
        let merged = merge_overlapping(&ranges);
        assert_eq!(merged, vec![TimeRange::new(100, 400), TimeRange::new(500, 600)]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let ranges = vec![TimeRange::new(100, 200), TimeRange::new(200, 300)];
        let merged = merge_overlapping(&ranges);
        assert_eq!(merged, vec![TimeRange::new(100, 300)]);
    }

    // ── room_is_free ─────────────────────────────────────

    #[test]
    fn empty_room_is_free() {
        let rs = make_room(vec![]);
        assert!(room_is_free(&rs, &TimeRange::new(0, 24 * H), 0));
    }

    #[test]
    fn booking_blocks_room() {
        let rs = make_room(vec![booking(10 * H, 11 * H)]);
        assert!(!room_is_free(&rs, &TimeRange::new(10 * H + 30 * M, 12 * H), 0));
        assert!(room_is_free(&rs, &TimeRange::new(11 * H, 12 * H), 0));
    }

    #[test]
    fn live_lock_blocks_room() {
        let rs = make_room(vec![lock(10 * H, 11 * H, 5000)]);
        assert!(!room_is_free(&rs, &TimeRange::new(10 * H, 11 * H), 4999));
    }

    #[test]
    fn expired_lock_does_not_block_room() {
        let rs = make_room(vec![lock(10 * H, 11 * H, 5000)]);
        assert!(room_is_free(&rs, &TimeRange::new(10 * H, 11 * H), 5000));
    }

    // ── free_windows ─────────────────────────────────────

    #[test]
    fn free_windows_empty_room_is_whole_query() {
        let rs = make_room(vec![]);
        let query = TimeRange::new(9 * H, 17 * H);
        assert_eq!(free_windows(&rs, &query, 0), vec![query]);
    }

    #[test]
    fn free_windows_split_by_booking() {
        let rs = make_room(vec![booking(10 * H, 10 * H + 30 * M)]);
        let query = TimeRange::new(9 * H, 12 * H);
        assert_eq!(
            free_windows(&rs, &query, 0),
            vec![
                TimeRange::new(9 * H, 10 * H),
                TimeRange::new(10 * H + 30 * M, 12 * H),
            ]
        );
    }

    #[test]
    fn free_windows_expired_lock_ignored() {
        let rs = make_room(vec![lock(10 * H, 11 * H, 1)]);
        let query = TimeRange::new(9 * H, 12 * H);
        assert_eq!(free_windows(&rs, &query, 1000), vec![query]);
    }

    #[test]
    fn free_windows_claim_spanning_query_edge_is_clamped() {
        let rs = make_room(vec![booking(8 * H, 10 * H)]);
        let query = TimeRange::new(9 * H, 12 * H);
        assert_eq!(
            free_windows(&rs, &query, 0),
            vec![TimeRange::new(10 * H, 12 * H)]
        );
    }

    #[test]
    fn free_windows_fully_occupied() {
        let rs = make_room(vec![booking(0, 24 * H)]);
        let query = TimeRange::new(9 * H, 17 * H);
        assert!(free_windows(&rs, &query, 0).is_empty());
    }

    #[test]
    fn free_windows_adjacent_claims_merge() {
        let rs = make_room(vec![booking(10 * H, 11 * H), booking(11 * H, 12 * H)]);
        let query = TimeRange::new(9 * H, 13 * H);
        assert_eq!(
            free_windows(&rs, &query, 0),
            vec![TimeRange::new(9 * H, 10 * H), TimeRange::new(12 * H, 13 * H)]
        );
    }
}
