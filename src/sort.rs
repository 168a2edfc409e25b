//! Reading order: top to bottom, then left to right inside a line band.

use float_ord::FloatOrd;
use tracing::instrument;

use crate::Region;

/// Centroids closer than this vertically (in pixels) are on the same line.
pub const DEFAULT_LINE_TOLERANCE: f32 = 10.0;

/// Stable sort of `regions` into reading order.
///
/// Regions are first ordered by centroid y, then grouped greedily into bands: a region joins the
/// current band while its y is within `line_tolerance` of the band's first region. Inside a band
/// the order is by centroid x. Band membership only depends on the y values, so sorting an
/// already sorted slice changes nothing.
#[instrument(level = "debug", skip(regions))]
pub fn sort_boxes(regions: &mut [Region], line_tolerance: f32) {
    regions.sort_by_key(|region| FloatOrd(region.center.y));

    let mut bands = Vec::with_capacity(regions.len());
    let mut band = 0usize;
    let mut band_top = None;
    for region in regions.iter() {
        match band_top {
            Some(top) if region.center.y - top < line_tolerance => {}
            Some(_) => {
                band += 1;
                band_top = Some(region.center.y);
            }
            None => band_top = Some(region.center.y),
        }
        bands.push(band);
    }

    let mut keyed = regions
        .iter()
        .cloned()
        .zip(bands)
        .collect::<Vec<_>>();
    keyed.sort_by_key(|(region, band)| (*band, FloatOrd(region.center.x)));
    for (slot, (region, _)) in regions.iter_mut().zip(keyed) {
        *slot = region;
    }
}

pub fn sort_by_arc_length(regions: &mut [Region]) {
    regions.sort_by_key(|region| FloatOrd(region.text_box.arc_length()));
}
