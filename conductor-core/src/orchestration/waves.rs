//! Wave computation over the sub-task dependency graph

use crate::error::DependencyError;

/// Compute each sub-task's wave from its dependency list
///
/// `wave(t) = 0` without dependencies, else `1 + max(wave(d))`. Dependencies
/// must point at strictly earlier indices, which rules out cycles; anything
/// else fails before a single sub-task runs.
pub fn compute_waves(dependencies: &[Vec<usize>]) -> Result<Vec<usize>, DependencyError> {
    let len = dependencies.len();
    let mut waves = Vec::with_capacity(len);

    for (index, deps) in dependencies.iter().enumerate() {
        let mut wave = 0;
        for &dependency in deps {
            if dependency >= len {
                return Err(DependencyError::OutOfRange {
                    index,
                    dependency,
                    len,
                });
            }
            if dependency == index {
                return Err(DependencyError::SelfReference { index });
            }
            if dependency > index {
                return Err(DependencyError::ForwardReference { index, dependency });
            }
            wave = wave.max(waves[dependency] + 1);
        }
        waves.push(wave);
    }

    Ok(waves)
}

/// Indices grouped by wave, in index order within each wave
pub fn group_by_wave(waves: &[usize]) -> Vec<Vec<usize>> {
    let count = waves.iter().max().map_or(0, |w| w + 1);
    let mut groups = vec![Vec::new(); count];
    for (index, &wave) in waves.iter().enumerate() {
        groups[wave].push(index);
    }
    groups
}
