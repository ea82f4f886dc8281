use std::collections::HashMap;

use color_eyre::eyre::{Result, WrapErr};

use crate::ports::playlist::{MAX_ITEMS_PER_CALL, PlaylistApi, PlaylistRef, PlaylistTrack};

/// A track id found more than once in a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Duplicate {
    track_id: String,
    label: String,
    /// Live playlist position of the first occurrence.
    first: usize,
    /// Positions of every later occurrence, ascending.
    extra: Vec<usize>,
}

/// Duplicated track ids ordered by their first position.
fn find_duplicates(tracks: &[PlaylistTrack]) -> Vec<Duplicate> {
    let mut by_id: HashMap<&str, Duplicate> = HashMap::new();
    for track in tracks {
        by_id
            .entry(track.track_id.as_str())
            .and_modify(|dup| dup.extra.push(track.position))
            .or_insert_with(|| Duplicate {
                track_id: track.track_id.clone(),
                label: track.label(),
                first: track.position,
                extra: Vec::new(),
            });
    }

    let mut duplicates: Vec<Duplicate> = by_id
        .into_values()
        .filter(|dup| !dup.extra.is_empty())
        .collect();
    duplicates.sort_by_key(|dup| dup.first);
    duplicates
}

/// Removes repeated tracks from a live playlist, keeping one occurrence of each.
///
/// Returns the number of occurrences removed.
pub async fn dedup_playlist<A: PlaylistApi + ?Sized>(api: &A, playlist_id: &str) -> Result<usize> {
    let tracks = api
        .list_tracks(playlist_id)
        .await
        .wrap_err_with(|| format!("Failed to list tracks of playlist {}", playlist_id))?;
    let duplicates = find_duplicates(&tracks);
    if duplicates.is_empty() {
        return Ok(0);
    }

    // later positions first so earlier ones stay valid
    let mut extras: Vec<(usize, &str)> = duplicates
        .iter()
        .flat_map(|dup| dup.extra.iter().map(|&pos| (pos, dup.track_id.as_str())))
        .collect();
    extras.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (position, track_id) in extras {
        let done = api
            .remove_track_occurrence(playlist_id, track_id, position as u32)
            .await
            .wrap_err_with(|| format!("Failed to remove duplicate of {}", track_id))?;
        if !done {
            tracing::debug!("Positional removal unsupported, rebuilding duplicates instead");
            let current = if removed > 0 {
                api.list_tracks(playlist_id).await.wrap_err_with(|| {
                    format!("Failed to list tracks of playlist {}", playlist_id)
                })?
            } else {
                tracks
            };
            return Ok(removed + rebuild_duplicates(api, playlist_id, &current).await?);
        }
        removed += 1;
    }

    Ok(removed)
}

/// Removes every occurrence of each duplicated track, then re-adds one at the
/// position of its first occurrence.
async fn rebuild_duplicates<A: PlaylistApi + ?Sized>(
    api: &A,
    playlist_id: &str,
    tracks: &[PlaylistTrack],
) -> Result<usize> {
    let duplicates = find_duplicates(tracks);
    let occurrences: usize = duplicates.iter().map(|dup| dup.extra.len() + 1).sum();
    let duplicate_ids: Vec<String> = duplicates.iter().map(|d| d.track_id.clone()).collect();

    for chunk in duplicate_ids.chunks(MAX_ITEMS_PER_CALL) {
        api.remove_all_occurrences(playlist_id, chunk)
            .await
            .wrap_err("Failed to remove duplicated tracks")?;
    }

    let removed_positions: Vec<usize> = tracks
        .iter()
        .filter(|track| duplicate_ids.contains(&track.track_id))
        .map(|track| track.position)
        .collect();

    let mut re_added = 0;
    for dup in &duplicates {
        // position among the entries left after removal, plus those re-added before it
        let removed_before = removed_positions.iter().filter(|&&p| p < dup.first).count();
        let position = (dup.first - removed_before + re_added) as u32;
        let outcome = api
            .add_tracks(playlist_id, std::slice::from_ref(&dup.track_id), Some(position))
            .await
            .wrap_err_with(|| format!("Failed to re-add track {}", dup.track_id))?;
        if outcome.confirmed.is_empty() {
            tracing::warn!(
                "Track {} ({}) was rejected when re-added and is no longer in playlist {}",
                dup.label,
                dup.track_id,
                playlist_id
            );
        } else {
            re_added += 1;
        }
    }

    Ok(occurrences - re_added)
}

/// Deduplicates each playlist in turn. A failing playlist is logged and skipped.
pub async fn dedup_playlists<A: PlaylistApi + ?Sized>(api: &A, playlists: &[PlaylistRef]) -> usize {
    let mut total = 0;
    for playlist in playlists {
        match dedup_playlist(api, &playlist.id).await {
            Ok(0) => tracing::debug!("No duplicates in \"{}\"", playlist.name),
            Ok(removed) => {
                tracing::info!("Removed {} duplicates from \"{}\"", removed, playlist.name);
                total += removed;
            }
            Err(error) => {
                tracing::warn!("Failed to deduplicate \"{}\": {:?}", playlist.name, error)
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::playlist::{AddOutcome, MockPlaylistApi};
    use crate::test_utils::{playlist_track, playlist_tracks};
    use color_eyre::eyre::eyre;
    use mockall::Sequence;
    use mockall::predicate::eq;

    fn tracks(values: &[&str]) -> Vec<PlaylistTrack> {
        playlist_tracks(values)
    }

    fn at(track_id: &str, position: usize) -> PlaylistTrack {
        PlaylistTrack {
            position,
            ..playlist_track(track_id)
        }
    }

    #[test]
    fn test_find_duplicates() {
        let dups = find_duplicates(&tracks(&["a", "b", "a", "c", "b", "a"]));
        assert_eq!(
            dups,
            vec![
                Duplicate {
                    track_id: "a".into(),
                    label: "Artist - Track a".into(),
                    first: 0,
                    extra: vec![2, 5],
                },
                Duplicate {
                    track_id: "b".into(),
                    label: "Artist - Track b".into(),
                    first: 1,
                    extra: vec![4],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_no_duplicates_makes_no_calls() {
        let mut api = MockPlaylistApi::new();
        api.expect_list_tracks()
            .returning(|_| Ok(tracks(&["a", "b"])));
        api.expect_remove_track_occurrence().never();
        api.expect_remove_all_occurrences().never();

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_positional_removal_goes_back_to_front() {
        let mut api = MockPlaylistApi::new();
        let mut seq = Sequence::new();
        api.expect_list_tracks()
            .times(1)
            .returning(|_| Ok(tracks(&["a", "b", "a", "c", "b"])));
        api.expect_remove_track_occurrence()
            .with(eq("pl"), eq("b"), eq(4u32))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(true));
        api.expect_remove_track_occurrence()
            .with(eq("pl"), eq("a"), eq(2u32))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(true));
        api.expect_remove_all_occurrences().never();

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_when_positional_removal_is_unsupported() {
        let mut api = MockPlaylistApi::new();
        let mut seq = Sequence::new();
        api.expect_list_tracks()
            .times(1)
            .returning(|_| Ok(tracks(&["x", "a", "b", "a", "c", "b"])));
        api.expect_remove_track_occurrence()
            .times(1)
            .returning(|_, _, _| Ok(false));
        api.expect_remove_all_occurrences()
            .withf(|id, track_ids| id == "pl" && track_ids == ["a", "b"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        // remaining: x c -> x a b c
        api.expect_add_tracks()
            .withf(|_, track_ids, position| track_ids == ["a"] && *position == Some(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, track_ids, _| {
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: vec![],
                })
            });
        api.expect_add_tracks()
            .withf(|_, track_ids, position| track_ids == ["b"] && *position == Some(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, track_ids, _| {
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: vec![],
                })
            });

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_positions_count_entries_skipped_by_listing() {
        // live: x, <local>, a, b, <local>, a
        let mut api = MockPlaylistApi::new();
        let mut seq = Sequence::new();
        api.expect_list_tracks()
            .times(1)
            .returning(|_| Ok(vec![at("x", 0), at("a", 2), at("b", 3), at("a", 5)]));
        api.expect_remove_track_occurrence()
            .with(eq("pl"), eq("a"), eq(5u32))
            .times(1)
            .returning(|_, _, _| Ok(false));
        api.expect_remove_all_occurrences()
            .withf(|_, track_ids| track_ids == ["a"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        // remaining: x, <local>, b, <local> -> x, <local>, a, b, <local>
        api.expect_add_tracks()
            .withf(|_, track_ids, position| track_ids == ["a"] && *position == Some(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, track_ids, _| {
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: vec![],
                })
            });

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_after_gap_shifts_later_duplicates() {
        // live: x, <local>, a, b, <local>, a, b
        let mut api = MockPlaylistApi::new();
        let mut seq = Sequence::new();
        api.expect_list_tracks()
            .times(1)
            .returning(|_| {
                Ok(vec![
                    at("x", 0),
                    at("a", 2),
                    at("b", 3),
                    at("a", 5),
                    at("b", 6),
                ])
            });
        api.expect_remove_track_occurrence()
            .returning(|_, _, _| Ok(false));
        api.expect_remove_all_occurrences()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        api.expect_add_tracks()
            .withf(|_, track_ids, position| track_ids == ["a"] && *position == Some(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, track_ids, _| {
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: vec![],
                })
            });
        api.expect_add_tracks()
            .withf(|_, track_ids, position| track_ids == ["b"] && *position == Some(3))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, track_ids, _| {
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: vec![],
                })
            });

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_re_add_counts_every_occurrence() {
        let mut api = MockPlaylistApi::new();
        api.expect_list_tracks()
            .returning(|_| Ok(tracks(&["a", "a"])));
        api.expect_remove_track_occurrence()
            .returning(|_, _, _| Ok(false));
        api.expect_remove_all_occurrences()
            .returning(|_, _| Ok(()));
        api.expect_add_tracks().returning(|_, track_ids, _| {
            Ok(AddOutcome {
                confirmed: vec![],
                rejected: track_ids.to_vec(),
            })
        });

        assert_eq!(dedup_playlist(&api, "pl").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_dedup_playlists_skips_failures() {
        let playlists = vec![
            PlaylistRef {
                id: "broken".into(),
                name: "Broken".into(),
                owner_id: "me".into(),
            },
            PlaylistRef {
                id: "ok".into(),
                name: "Ok".into(),
                owner_id: "me".into(),
            },
        ];

        let mut api = MockPlaylistApi::new();
        api.expect_list_tracks()
            .with(eq("broken"))
            .returning(|_| Err(eyre!("HTTP 502")));
        api.expect_list_tracks()
            .with(eq("ok"))
            .returning(|_| Ok(tracks(&["a", "a"])));
        api.expect_remove_track_occurrence()
            .returning(|_, _, _| Ok(true));

        assert_eq!(dedup_playlists(&api, &playlists).await, 1);
    }
}
