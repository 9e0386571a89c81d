use shared::{Canvas, Color};

const NEIGHBOURS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Bucket fill from `(x, y)` over 4-connected cells sharing the start cell's
/// color.
///
/// The canvas is updated in place. Returns the cells that changed in
/// row-major order, which is also the order their `pixelChange` messages are
/// sent in. Nothing changes if the start is outside the canvas or already
/// holds `color`.
pub fn flood_fill(canvas: &mut Canvas, x: i64, y: i64, color: &Color) -> Vec<(i64, i64)> {
    let target = match canvas.get(x, y) {
        Some(current) if current != color => current.clone(),
        _ => return Vec::new(),
    };

    let mut changed = Vec::new();
    let mut stack = vec![(x, y)];
    while let Some((cx, cy)) = stack.pop() {
        if canvas.get(cx, cy) != Some(&target) {
            continue;
        }
        canvas.set(cx, cy, color.clone());
        changed.push((cx, cy));

        for (dx, dy) in NEIGHBOURS {
            stack.push((cx + dx, cy + dy));
        }
    }

    changed.sort_by_key(|&(cx, cy)| (cy, cx));
    changed
}
