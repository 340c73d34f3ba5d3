//! Rule-based mood / activity / time-of-day labels.
//!
//! Every classifier is tiered: first matching rule wins, then the default.
//! Rules read raw (unstandardized) feature values. Some predicates overlap
//! (a calm, bright track can satisfy both Afternoon and Night), so tier order
//! is part of the contract.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::features::{Feature, FeatureVector, get};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mood {
    Happy,
    Angry,
    Relaxed,
    Sad,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    Workout,
    StudyFocus,
    Party,
    Relaxation,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
    AnyTime,
}

/// The three labels derived for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub mood: Mood,
    pub activity: Activity,
    pub time_of_day: TimeOfDay,
}

impl Labels {
    /// Derive all labels from a raw feature vector.
    pub fn classify(features: &FeatureVector) -> Self {
        Self {
            mood: classify_mood(features),
            activity: classify_activity(features),
            time_of_day: classify_time_of_day(features),
        }
    }
}

/// Mood from valence and energy.
pub fn classify_mood(f: &FeatureVector) -> Mood {
    let valence = get(f, Feature::Valence);
    let energy = get(f, Feature::Energy);

    if valence > 0.6 && energy > 0.6 {
        Mood::Happy
    } else if valence < 0.4 && energy > 0.6 {
        Mood::Angry
    } else if valence > 0.6 && energy < 0.4 {
        Mood::Relaxed
    } else if valence < 0.4 && energy < 0.4 {
        Mood::Sad
    } else {
        Mood::Neutral
    }
}

/// Activity from tempo, energy, acousticness and danceability.
pub fn classify_activity(f: &FeatureVector) -> Activity {
    let tempo = get(f, Feature::Tempo);
    let energy = get(f, Feature::Energy);
    let acousticness = get(f, Feature::Acousticness);
    let danceability = get(f, Feature::Danceability);

    if tempo > 120.0 && energy > 0.7 {
        Activity::Workout
    } else if acousticness > 0.6 && energy < 0.5 {
        Activity::StudyFocus
    } else if danceability > 0.7 && energy > 0.6 {
        Activity::Party
    } else if (70.0..=110.0).contains(&tempo) && energy < 0.4 {
        Activity::Relaxation
    } else {
        Activity::General
    }
}

/// Time of day from energy, tempo and valence.
pub fn classify_time_of_day(f: &FeatureVector) -> TimeOfDay {
    let energy = get(f, Feature::Energy);
    let tempo = get(f, Feature::Tempo);
    let valence = get(f, Feature::Valence);

    if energy > 0.7 && tempo > 110.0 {
        TimeOfDay::Morning
    } else if (0.4..=0.7).contains(&energy) && valence >= 0.5 {
        TimeOfDay::Afternoon
    } else if energy < 0.4 && tempo < 100.0 {
        TimeOfDay::Evening
    } else if energy < 0.5 && valence > 0.6 {
        TimeOfDay::Night
    } else {
        TimeOfDay::AnyTime
    }
}

impl TimeOfDay {
    /// Playlist suggestion for a local clock hour (0-23).
    pub fn for_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }
}

/// Canonical string forms, shared by parsing, display and persistence.
macro_rules! label_strings {
    ($ty:ident, $what:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(EngineError::DataIntegrity(format!(
                        concat!("unknown ", $what, " label '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

label_strings!(Mood, "mood", {
    Happy => "Happy",
    Angry => "Angry",
    Relaxed => "Relaxed",
    Sad => "Sad",
    Neutral => "Neutral",
});

label_strings!(Activity, "activity", {
    Workout => "Workout",
    StudyFocus => "Study/Focus",
    Party => "Party",
    Relaxation => "Relaxation",
    General => "General",
});

label_strings!(TimeOfDay, "time-of-day", {
    Morning => "Morning",
    Afternoon => "Afternoon",
    Evening => "Evening",
    Night => "Night",
    AnyTime => "Any Time",
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    /// Build a vector from the handful of features the rules read.
    fn track(danceability: f64, energy: f64, valence: f64, tempo: f64, acousticness: f64) -> FeatureVector {
        let mut f = [0.0; FEATURE_COUNT];
        f[Feature::Danceability.index()] = danceability;
        f[Feature::Energy.index()] = energy;
        f[Feature::Valence.index()] = valence;
        f[Feature::Tempo.index()] = tempo;
        f[Feature::Acousticness.index()] = acousticness;
        f[Feature::Loudness.index()] = -7.0;
        f
    }

    fn mood(valence: f64, energy: f64) -> Mood {
        classify_mood(&track(0.5, energy, valence, 100.0, 0.1))
    }

    #[test]
    fn mood_reference_cases() {
        assert_eq!(mood(0.7, 0.7).as_str(), "Happy");
        assert_eq!(mood(0.3, 0.7).as_str(), "Angry");
        assert_eq!(mood(0.5, 0.5).as_str(), "Neutral");
        assert_eq!(mood(0.7, 0.3), Mood::Relaxed);
        assert_eq!(mood(0.3, 0.3), Mood::Sad);
    }

    #[test]
    fn mood_thresholds_are_strict() {
        assert_eq!(mood(0.6, 0.9), Mood::Neutral);
        assert_eq!(mood(0.9, 0.6), Mood::Neutral);
        assert_eq!(mood(0.4, 0.2), Mood::Neutral);
    }

    #[test]
    fn mood_is_pure() {
        let f = track(0.2, 0.65, 0.61, 90.0, 0.0);
        assert_eq!(classify_mood(&f), classify_mood(&f));
        assert_eq!(Labels::classify(&f), Labels::classify(&f));
    }

    #[test]
    fn activity_tiers() {
        assert_eq!(classify_activity(&track(0.9, 0.8, 0.5, 130.0, 0.0)), Activity::Workout);
        assert_eq!(classify_activity(&track(0.5, 0.3, 0.5, 90.0, 0.8)), Activity::StudyFocus);
        assert_eq!(classify_activity(&track(0.8, 0.65, 0.5, 100.0, 0.1)), Activity::Party);
        assert_eq!(classify_activity(&track(0.5, 0.3, 0.5, 70.0, 0.1)), Activity::Relaxation);
        assert_eq!(classify_activity(&track(0.5, 0.3, 0.5, 110.0, 0.1)), Activity::Relaxation);
        assert_eq!(classify_activity(&track(0.5, 0.5, 0.5, 111.0, 0.1)), Activity::General);
    }

    #[test]
    fn activity_workout_beats_party() {
        // Matches Workout and Party; Workout is the higher tier
        assert_eq!(classify_activity(&track(0.95, 0.9, 0.9, 125.0, 0.0)), Activity::Workout);
    }

    #[test]
    fn activity_study_beats_relaxation() {
        assert_eq!(classify_activity(&track(0.2, 0.2, 0.5, 90.0, 0.9)), Activity::StudyFocus);
    }

    #[test]
    fn time_of_day_tiers() {
        assert_eq!(classify_time_of_day(&track(0.5, 0.8, 0.5, 120.0, 0.0)), TimeOfDay::Morning);
        assert_eq!(classify_time_of_day(&track(0.5, 0.4, 0.5, 120.0, 0.0)), TimeOfDay::Afternoon);
        assert_eq!(classify_time_of_day(&track(0.5, 0.7, 0.5, 100.0, 0.0)), TimeOfDay::Afternoon);
        assert_eq!(classify_time_of_day(&track(0.5, 0.3, 0.2, 90.0, 0.0)), TimeOfDay::Evening);
        assert_eq!(classify_time_of_day(&track(0.5, 0.3, 0.7, 105.0, 0.0)), TimeOfDay::Night);
        assert_eq!(classify_time_of_day(&track(0.5, 0.9, 0.5, 100.0, 0.0)), TimeOfDay::AnyTime);
    }

    #[test]
    fn time_of_day_afternoon_beats_night() {
        // energy 0.45, valence 0.8 satisfies both Afternoon and Night
        assert_eq!(classify_time_of_day(&track(0.5, 0.45, 0.8, 120.0, 0.0)), TimeOfDay::Afternoon);
    }

    #[test]
    fn time_of_day_evening_beats_night() {
        assert_eq!(classify_time_of_day(&track(0.5, 0.2, 0.9, 80.0, 0.0)), TimeOfDay::Evening);
    }

    #[test]
    fn hour_suggestions() {
        assert_eq!(TimeOfDay::for_hour(4), TimeOfDay::Night);
        assert_eq!(TimeOfDay::for_hour(5), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::for_hour(11), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::for_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::for_hour(17), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::for_hour(21), TimeOfDay::Night);
        assert_eq!(TimeOfDay::for_hour(0), TimeOfDay::Night);
    }

    #[test]
    fn label_strings_round_trip() {
        for m in Mood::ALL {
            assert_eq!(m.as_str().parse::<Mood>().unwrap(), *m);
        }
        for a in Activity::ALL {
            assert_eq!(a.as_str().parse::<Activity>().unwrap(), *a);
        }
        for t in TimeOfDay::ALL {
            assert_eq!(t.to_string().parse::<TimeOfDay>().unwrap(), *t);
        }
        assert_eq!(Activity::StudyFocus.as_str(), "Study/Focus");
        assert_eq!(TimeOfDay::AnyTime.as_str(), "Any Time");
        assert!("happy".parse::<Mood>().is_err());
    }
}
