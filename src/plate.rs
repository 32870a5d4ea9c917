use rustc_hash::FxHashMap;

/// Number of positions on one plate (16 rows x 24 columns)
pub const WELLS_PER_PLATE: u32 = 384;

/// Number of rows on one plate
pub const PLATE_ROWS: u32 = 16;

///////////////////////////////
/// Wells are 0-indexed integers, numbered plate after plate.
/// Plate index for a well
pub fn plate_of(well: u32) -> u32 {
    well / WELLS_PER_PLATE
}

///////////////////////////////
/// Position of a well within its plate, as (row letter, 1-based column)
pub fn well_position(well: u32) -> (char, u32) {
    let q = well % WELLS_PER_PLATE;
    let row = (b'A' + (q % PLATE_ROWS) as u8) as char;
    let col = q / PLATE_ROWS + 1;
    (row, col)
}

///////////////////////////////
/// Row position token, namespaced by plate so that the same row on two
/// plates never counts as one position
pub fn row_token(well: u32) -> String {
    let (row, _col) = well_position(well);
    format!("R{}_P{}", row, plate_of(well))
}

/// Column position token, namespaced by plate
pub fn col_token(well: u32) -> String {
    let (_row, col) = well_position(well);
    format!("C{}_P{}", col, plate_of(well))
}

/// True if two wells sit next to each other on the same plate.
/// Row-neighbours differ by 1, column-neighbours by 16, diagonals by 15 or 17.
pub fn is_neighbour(a: u32, b: u32) -> bool {
    let qa = (a % WELLS_PER_PLATE) as i32;
    let qb = (b % WELLS_PER_PLATE) as i32;
    matches!((qa - qb).abs(), 1 | 15 | 16 | 17)
}

/// Largest repeat count of any single row and column position over a well set
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBias {
    pub row_max: u32,
    pub row_token: String,
    pub col_max: u32,
    pub col_token: String,
}

///////////////////////////////
/// Count how often wells repeat on one plate row or plate column.
/// A set of wells from genuinely independent subpools should spread out;
/// repeats concentrated on one row/column are the signature of index bleed
pub fn row_col_max(wells: &[u32]) -> Option<PositionBias> {
    if wells.is_empty() {
        return None;
    }

    let mut row_counts: FxHashMap<String, u32> = FxHashMap::default();
    let mut col_counts: FxHashMap<String, u32> = FxHashMap::default();
    for &w in wells {
        *row_counts.entry(row_token(w)).or_insert(0) += 1;
        *col_counts.entry(col_token(w)).or_insert(0) += 1;
    }

    //Ties broken by token order to keep the argmax deterministic
    let pick_max = |counts: &FxHashMap<String, u32>| {
        let mut best: Option<(&String, u32)> = None;
        for (tok, &cnt) in counts {
            best = match best {
                None => Some((tok, cnt)),
                Some((btok, bcnt)) => {
                    if cnt > bcnt || (cnt == bcnt && tok.as_str() < btok.as_str()) {
                        Some((tok, cnt))
                    } else {
                        Some((btok, bcnt))
                    }
                }
            };
        }
        let (tok, cnt) = best.unwrap();
        (tok.clone(), cnt)
    };

    let (rtok, rmax) = pick_max(&row_counts);
    let (ctok, cmax) = pick_max(&col_counts);
    Some(PositionBias {
        row_max: rmax,
        row_token: rtok,
        col_max: cmax,
        col_token: ctok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_of_first_wells() {
        assert_eq!(well_position(0), ('A', 1));
        assert_eq!(well_position(1), ('B', 1));
        assert_eq!(well_position(15), ('P', 1));
        assert_eq!(well_position(16), ('A', 2));
        assert_eq!(well_position(383), ('P', 24));
        //same position on the next plate
        assert_eq!(well_position(384), ('A', 1));
        assert_eq!(plate_of(384), 1);
    }

    #[test]
    fn tokens_are_plate_namespaced() {
        assert_eq!(row_token(0), "RA_P0");
        assert_eq!(row_token(384), "RA_P1");
        assert_ne!(row_token(0), row_token(384));
        assert_eq!(col_token(16), "C2_P0");
    }

    #[test]
    fn neighbours() {
        assert!(is_neighbour(0, 1));
        assert!(is_neighbour(0, 16));
        assert!(is_neighbour(17, 0));
        assert!(!is_neighbour(0, 2));
        assert!(!is_neighbour(0, 32));
    }

    #[test]
    fn repeat_counts_over_a_well_set() {
        //wells 0,16,32 share row A of plate 0; 0 and 1 share column 1
        let bias = row_col_max(&[0, 1, 16, 32]).unwrap();
        assert_eq!(bias.row_max, 3);
        assert_eq!(bias.row_token, "RA_P0");
        assert_eq!(bias.col_max, 2);
        assert_eq!(bias.col_token, "C1_P0");

        assert!(row_col_max(&[]).is_none());
    }
}
